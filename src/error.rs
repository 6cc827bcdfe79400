//! HaloError: unified error type for grid-halo public APIs.
//!
//! Every fallible public operation returns `Result<_, HaloError>`. Variants
//! carry the offending argument position (1-based, matching how callers count
//! the fields they passed), the dimension, or the byte counts involved, so a
//! failure can be traced without re-running under a debugger.

use thiserror::Error;

use crate::topology::Side;

/// Unified error type for halo-exchange operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HaloError {
    /// A field has `ol < 2` on every dimension and therefore no halo to fill.
    #[error("field at position {position} has no dimension with an overlap of at least 2")]
    NoHaloOverlap {
        /// 1-based position in the `update_halo` argument list.
        position: usize,
    },
    /// The same array was passed twice in one call.
    #[error("field at position {position} aliases an earlier field in the same call")]
    AliasedField {
        /// 1-based position of the second occurrence.
        position: usize,
    },
    /// All fields of one call must share an element type.
    #[error("field at position {position} has element type {found} but the call uses {expected}")]
    MixedElemKind {
        /// 1-based position of the first offending field.
        position: usize,
        expected: &'static str,
        found: &'static str,
    },
    /// A field shape does not match the flat buffer it borrows.
    #[error("field shape {nx}x{ny}x{nz} does not cover the supplied buffer of {len} elements")]
    ShapeMismatch {
        nx: usize,
        ny: usize,
        nz: usize,
        len: usize,
    },
    /// A field must have between one and three dimensions.
    #[error("field rank {ndims} is outside the supported range 1..=3")]
    UnsupportedRank { ndims: usize },
    /// One neighbour along a dimension is this process and the other is not.
    #[error("incoherent neighbours along dimension {dim}: one side is self, the other is not")]
    IncoherentNeighbors { dim: usize },
    /// The process grid does not contain the given rank.
    #[error("rank {rank} outside process grid of {nprocs} processes")]
    RankOutOfGrid { rank: usize, nprocs: usize },
    /// Scratch allocation failed; the pool is unchanged and the call may be retried.
    #[error("failed to allocate {bytes} bytes of halo scratch")]
    AllocationFailed { bytes: usize },
    /// A pack/unpack handle was armed twice without an intervening wait.
    #[error("{what} handle ({side:?}, dim {dim}, field position {position}) armed while already armed")]
    HandleAlreadyArmed {
        what: &'static str,
        side: Side,
        dim: usize,
        position: usize,
    },
    /// A wait was issued for a handle that was never armed.
    #[error("{what} handle ({side:?}, dim {dim}, field position {position}) awaited but never armed")]
    HandleNotArmed {
        what: &'static str,
        side: Side,
        dim: usize,
        position: usize,
    },
    /// A transport wait failed or delivered nothing where data was required.
    #[error("transport failure with peer {peer}: {detail}")]
    CommFailure { peer: usize, detail: String },
    /// A received message had the wrong length for the agreed halo plane.
    #[error("halo message from peer {peer}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        peer: usize,
        expected: usize,
        got: usize,
    },
    /// A device-resident field was passed but its backend is not available.
    #[error("device backend {backend} unavailable: {detail}")]
    BackendUnavailable {
        backend: &'static str,
        detail: String,
    },
    /// The element type is not supported by the backend handling the field.
    #[error("element type {kind} unsupported on the {backend} backend")]
    UnsupportedElem {
        kind: &'static str,
        backend: &'static str,
    },
    /// A device runtime call failed.
    #[error("device error on the {backend} backend: {detail}")]
    Device {
        backend: &'static str,
        detail: String,
    },
}
