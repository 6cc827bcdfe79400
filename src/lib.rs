//! # grid-halo
//!
//! grid-halo is a distributed halo-exchange engine for implicit global grids:
//! given co-located multi-dimensional numeric fields on host or GPU memory, it
//! synchronizes the one-plane-thick boundary regions ("halos") between
//! neighbouring subdomains of a Cartesian process decomposition on every
//! iteration of a stencil computation.
//!
//! ## Features
//! - Dimension-sequential exchange protocol that fills corners and edges by
//!   transit, without explicit corner messages
//! - Persistent, type-erased scratch pools with quantized growth and in-place
//!   element-type reinterpretation
//! - Axis-specialized host pack/unpack with an optional threaded copy path
//! - Pluggable communication backends (serial, intra-process loopback, MPI)
//!   behind one non-blocking `Communicator` trait
//! - Optional GPU backends: CUDA (device-aware or pinned-host staged) and a
//!   portable wgpu path with compute-kernel packing
//!
//! ## Usage
//! Add `grid-halo` as a dependency in your `Cargo.toml` and enable features
//! as needed:
//!
//! ```toml
//! [dependencies]
//! grid-halo = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "cuda", "wgpu"]
//! ```
//!
//! A single-process, periodic 1-D update:
//!
//! ```
//! use grid_halo::prelude::*;
//!
//! let topo = CartesianTopology::single([true, false, false], [10, 1, 1], [2, 0, 0]);
//! let mut ex = HaloExchanger::new(topo, NoComm);
//! let mut data: Vec<f64> = (0..10).map(|i| i as f64).collect();
//! let mut fields = [AnyField::from(Field::from_host(&mut data, &[10]).unwrap())];
//! ex.update_halo(&mut fields).unwrap();
//! assert_eq!(data[0], 8.0);
//! assert_eq!(data[9], 1.0);
//! ```

pub mod buffer;
pub mod capability;
pub mod comm;
pub mod error;
pub mod exchange;
pub mod field;
pub mod gpu;
pub mod pack;
pub mod sched;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::{CommTag, Communicator, LoopbackComm, NoComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::error::HaloError;
    pub use crate::exchange::{ExchangeOptions, HaloExchanger};
    pub use crate::field::{AnyField, ElemKind, Field, HaloElem};
    #[cfg(feature = "cuda")]
    pub use crate::gpu::cuda::CudaField;
    #[cfg(feature = "wgpu")]
    pub use crate::gpu::wgpu::{WgpuField, WgpuGpu};
    pub use crate::topology::{CartesianTopology, DimKind, Side};
}
