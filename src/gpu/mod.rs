//! Device backends.
//!
//! The orchestrator is backend-agnostic: only pack/unpack submission, stream
//! synchronization, and the buffer-mirror decision differ per backend. The
//! CUDA backend supports device-aware transport and a driver-level staged
//! copy; the portable `wgpu` backend always packs with a device kernel and
//! stages the packed plane through a mapped host buffer.

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(feature = "wgpu")]
pub mod wgpu;
