//! Communication abstraction for intra-process loopback and inter-process
//! (MPI) message passing.
//!
//! Halo wire format: each message is a contiguous, row-major sequence of
//! exactly `halo_size(dim, field)` elements of the sender's element type,
//! under a fixed tag. Peers agree on length and type by construction, so
//! there is no header and no negotiation.
//!
//! Buffer contract: the memory behind a posted send or receive must stay
//! live and unmodified until its handle is waited. Completion delivers a
//! received plane *in place* into the posted buffer — which is what lets a
//! device-aware MPI library write GPU memory directly, and keeps every
//! backend on one code path in the orchestrator.

use crate::error::HaloError;

/// Anything that can be waited on.
pub trait Wait {
    /// Block until the operation completes. For receives the plane has been
    /// delivered into the posted buffer when this returns.
    fn wait(self) -> Result<(), HaloError>;
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a non-blocking send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Self::SendHandle;

    /// Post a non-blocking receive of exactly `buf.len()` bytes from `peer`,
    /// to be delivered into `buf`.
    fn irecv(&self, peer: usize, tag: CommTag, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this process (0..size-1).
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Synchronization barrier (default: no-op for non-MPI comms).
    fn barrier(&self) {}
}

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(u16);

impl CommTag {
    /// Create a new tag from a raw `u16`.
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    /// Return the underlying `u16` value.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Safely offset the tag by `dx`, wrapping on overflow.
    #[inline]
    pub const fn offset(self, dx: u16) -> Self {
        Self(self.0.wrapping_add(dx))
    }
}

impl From<u16> for CommTag {
    #[inline]
    fn from(x: u16) -> Self {
        CommTag::new(x)
    }
}

/// Compile-time no-op comm for single-process runs and serial unit tests.
///
/// A single-process topology exchanges halos through the in-process local
/// path, which never posts messages, so the no-op handles are unreachable in
/// correct use.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Result<(), HaloError> {
        Ok(())
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: CommTag, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: CommTag, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }
}

// --- LoopbackComm: thread-per-rank transport within one process ---

pub use loopback::{LoopbackComm, LoopbackRecv, LoopbackSend};

mod loopback {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Condvar, Mutex, PoisonError};

    use once_cell::sync::Lazy;

    use super::{CommTag, Communicator, Wait};
    use crate::error::HaloError;

    /// Identity of one directed message stream. Planes queued on the same
    /// route drain in posting order, the same non-overtaking guarantee the
    /// MPI matching relies on.
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
    struct Route {
        from: usize,
        to: usize,
        tag: CommTag,
    }

    /// Process-wide queues of in-flight planes, shared by every simulated
    /// rank. A panicking test thread may poison the lock; the queue data is
    /// plain bytes and stays coherent, so poisoning is shrugged off rather
    /// than propagated into unrelated ranks.
    struct PlaneQueues {
        queues: Mutex<HashMap<Route, VecDeque<Vec<u8>>>>,
        arrival: Condvar,
    }

    impl PlaneQueues {
        fn post(&self, route: Route, plane: Vec<u8>) {
            let mut queues = self
                .queues
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            queues.entry(route).or_default().push_back(plane);
            self.arrival.notify_all();
        }

        fn take(&self, route: Route) -> Vec<u8> {
            let mut queues = self
                .queues
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            loop {
                if let Some(plane) = queues.get_mut(&route).and_then(|q| q.pop_front()) {
                    return plane;
                }
                queues = self
                    .arrival
                    .wait(queues)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    static PLANES: Lazy<PlaneQueues> = Lazy::new(|| PlaneQueues {
        queues: Mutex::new(HashMap::new()),
        arrival: Condvar::new(),
    });

    /// Loopback communicator: one instance per simulated rank, all ranks in
    /// one process (typically one thread each). Sends complete immediately;
    /// receives block in `wait` until the matching plane arrives and then
    /// deliver it into the posted buffer, like the MPI backend does.
    #[derive(Clone, Debug)]
    pub struct LoopbackComm {
        rank: usize,
        size: usize,
    }

    impl LoopbackComm {
        pub fn new(rank: usize, size: usize) -> Self {
            Self { rank, size }
        }
    }

    pub struct LoopbackSend;

    impl Wait for LoopbackSend {
        fn wait(self) -> Result<(), HaloError> {
            Ok(())
        }
    }

    /// Pending receive: remembers its route and where the plane must land.
    /// Holds a raw pointer under the trait's buffer-liveness contract; the
    /// handle stays on the posting thread.
    pub struct LoopbackRecv {
        route: Route,
        dst: *mut u8,
        len: usize,
    }

    impl Wait for LoopbackRecv {
        fn wait(self) -> Result<(), HaloError> {
            let plane = PLANES.take(self.route);
            if plane.len() != self.len {
                return Err(HaloError::BufferSizeMismatch {
                    peer: self.route.from,
                    expected: self.len,
                    got: plane.len(),
                });
            }
            let dst = unsafe { std::slice::from_raw_parts_mut(self.dst, self.len) };
            dst.copy_from_slice(&plane);
            Ok(())
        }
    }

    impl Communicator for LoopbackComm {
        type SendHandle = LoopbackSend;
        type RecvHandle = LoopbackRecv;

        fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Self::SendHandle {
            let route = Route {
                from: self.rank,
                to: peer,
                tag,
            };
            PLANES.post(route, buf.to_vec());
            LoopbackSend
        }

        fn irecv(&self, peer: usize, tag: CommTag, buf: &mut [u8]) -> Self::RecvHandle {
            LoopbackRecv {
                route: Route {
                    from: peer,
                    to: self.rank,
                    tag,
                },
                dst: buf.as_mut_ptr(),
                len: buf.len(),
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }
    }
}

// --- MPI backend ---

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::CommunicatorCollectives;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::request::StaticScope;
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    /// MPI world communicator.
    ///
    /// Sends and receives post directly on the caller's buffers (no staging
    /// copy), which is what allows a device-aware MPI library to move GPU
    /// memory. The buffer-liveness contract is upheld by the halo pools:
    /// they persist across the whole call that waits every handle it posts.
    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl Default for MpiComm {
        fn default() -> Self {
            let uni = mpi::initialize().expect("MPI already initialized or unavailable");
            let world = uni.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: uni,
                world,
                rank,
                size,
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Self::SendHandle {
            // Lifetime extension is sound under the trait's buffer contract:
            // the caller keeps `buf` live and unmodified until the wait.
            let slice: &'static [u8] =
                unsafe { std::slice::from_raw_parts(buf.as_ptr(), buf.len()) };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, i32::from(tag.as_u16()));
            MpiSendHandle { req: Some(req) }
        }

        fn irecv(&self, peer: usize, tag: CommTag, buf: &mut [u8]) -> Self::RecvHandle {
            let slice: &'static mut [u8] =
                unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr(), buf.len()) };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice, i32::from(tag.as_u16()));
            MpiRecvHandle { req: Some(req) }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }

    pub struct MpiSendHandle {
        req: Option<mpi::request::Request<'static, [u8], StaticScope>>,
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Result<(), HaloError> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            Ok(())
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            // A dropped handle must not leave MPI touching memory whose
            // liveness contract has expired; block until the transfer drains.
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
        }
    }

    pub struct MpiRecvHandle {
        req: Option<mpi::request::Request<'static, [u8], StaticScope>>,
    }

    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Result<(), HaloError> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            Ok(())
        }
    }

    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
