//! Exchange orchestrator: one halo update across all supplied fields.
//!
//! Dimensions progress strictly sequentially: the full exchange for a
//! dimension (sends drained, unpacks finished) completes before any work for
//! the next one begins. Halo cells at corners and edges belong to several
//! dimensions, so sequencing guarantees that the send plane for dimension
//! `d+1` already contains the values received during dimension `d`, filling
//! corners without explicit corner messages.
//!
//! Within a dimension: receives are posted before sends; a send leaves only
//! after its pack completed; an unpack runs only after its receive
//! completed; packs overlap freely with receives and with other packs.

use std::mem::size_of;

use crate::buffer::BufferPool;
use crate::capability;
use crate::comm::{CommTag, Communicator, Wait};
use crate::error::HaloError;
use crate::field::{
    halo_size, recv_ranges, send_ranges, AnyField, Field, HaloElem, Residency,
};
use crate::pack::{pack_plane, unpack_plane, THREADCOPY_THRESHOLD};
use crate::sched::HandleTable;
use crate::topology::{CartesianTopology, DimKind, Side, NDIMS};

/// Tunables of one exchanger.
#[derive(Clone, Debug)]
pub struct ExchangeOptions {
    /// Base tag of halo messages. Every plane travels under this one tag;
    /// matching relies on non-overtaking point-to-point order plus the fixed
    /// posting order.
    pub tag: CommTag,
    /// Contiguous host copies at or above this many elements use the thread
    /// pool.
    pub thread_copy_threshold: usize,
    /// Per-dimension override of CUDA-aware transport; `None` consults
    /// [`capability::cuda_aware_mpi`].
    pub cuda_aware: Option<[bool; NDIMS]>,
    /// Per-dimension override of ROCm-aware transport; `None` consults
    /// [`capability::rocm_aware_mpi`].
    pub rocm_aware: Option<[bool; NDIMS]>,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            tag: CommTag::new(0),
            thread_copy_threshold: THREADCOPY_THRESHOLD,
            cuda_aware: None,
            rocm_aware: None,
        }
    }
}

impl ExchangeOptions {
    /// Whether transport may touch CUDA memory directly on `dim`.
    pub fn cuda_aware_for(&self, dim: usize) -> bool {
        self.cuda_aware
            .map(|a| a[dim])
            .unwrap_or_else(capability::cuda_aware_mpi)
    }

    /// Whether transport may touch ROCm memory directly on `dim`.
    pub fn rocm_aware_for(&self, dim: usize) -> bool {
        self.rocm_aware
            .map(|a| a[dim])
            .unwrap_or_else(capability::rocm_aware_mpi)
    }
}

/// Driver of halo updates for one process of a Cartesian decomposition.
///
/// Owns the persistent scratch (buffer pool, handle tables, device scratch)
/// that amortizes allocation across calls. Not for concurrent use: callers
/// running exchanges from several threads must serialize externally.
pub struct HaloExchanger<C: Communicator> {
    topo: CartesianTopology,
    comm: C,
    opts: ExchangeOptions,
    pool: BufferPool,
    iwrite: HandleTable,
    iread: HandleTable,
    #[cfg(feature = "cuda")]
    cuda: Option<crate::gpu::cuda::CudaScratch>,
    #[cfg(feature = "wgpu")]
    wgpu: Option<crate::gpu::wgpu::WgpuScratch>,
}

impl<C: Communicator> HaloExchanger<C> {
    /// New exchanger with default options.
    pub fn new(topo: CartesianTopology, comm: C) -> Self {
        Self::with_options(topo, comm, ExchangeOptions::default())
    }

    /// New exchanger with explicit options.
    pub fn with_options(topo: CartesianTopology, comm: C, opts: ExchangeOptions) -> Self {
        Self {
            topo,
            comm,
            opts,
            pool: BufferPool::default(),
            iwrite: HandleTable::new("pack"),
            iread: HandleTable::new("unpack"),
            #[cfg(feature = "cuda")]
            cuda: None,
            #[cfg(feature = "wgpu")]
            wgpu: None,
        }
    }

    /// The process topology this exchanger serves.
    pub fn topology(&self) -> &CartesianTopology {
        &self.topo
    }

    /// The communicator in use.
    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Scratch pool, exposing growth counters.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    #[inline]
    fn ol<T: HaloElem>(&self, dim: usize, f: &Field<'_, T>) -> usize {
        self.topo.overlap_of(dim, f.size(dim))
    }

    /// Update the halos of all supplied fields, one dimension at a time.
    ///
    /// Preconditions (checked before any work): every field has at least one
    /// dimension with overlap >= 2, no two fields alias, and all fields share
    /// one element type. Violations name the 1-based argument position.
    pub fn update_halo(&mut self, fields: &mut [AnyField<'_>]) -> Result<(), HaloError> {
        if fields.is_empty() {
            return Ok(());
        }
        self.check_fields(fields)?;
        match fields[0].kind() {
            crate::field::ElemKind::F32 => self.run::<f32>(fields),
            crate::field::ElemKind::F64 => self.run::<f64>(fields),
            crate::field::ElemKind::I32 => self.run::<i32>(fields),
            crate::field::ElemKind::U16 => self.run::<u16>(fields),
        }
    }

    /// Release every persistent scratch resource (host pool, handle tables,
    /// device buffers, pinned registrations). The exchanger stays usable; the
    /// next update re-allocates.
    pub fn free_update_halo_buffers(&mut self) {
        self.pool.free();
        self.iwrite.free();
        self.iread.free();
        #[cfg(feature = "cuda")]
        {
            self.cuda = None;
        }
        #[cfg(feature = "wgpu")]
        {
            self.wgpu = None;
        }
    }

    fn check_fields(&self, fields: &[AnyField<'_>]) -> Result<(), HaloError> {
        for (i, f) in fields.iter().enumerate() {
            let ext = f.extents();
            let any_halo =
                (0..NDIMS).any(|d| self.topo.overlap_of(d, ext[d]) >= 2);
            if !any_halo {
                return Err(HaloError::NoHaloOverlap { position: i + 1 });
            }
        }
        for i in 0..fields.len() {
            for j in 0..i {
                if fields[i].addr() == fields[j].addr() {
                    return Err(HaloError::AliasedField { position: i + 1 });
                }
            }
        }
        let expected = fields[0].kind();
        for (i, f) in fields.iter().enumerate() {
            if f.kind() != expected {
                return Err(HaloError::MixedElemKind {
                    position: i + 1,
                    expected: expected.name(),
                    found: f.kind().name(),
                });
            }
        }
        Ok(())
    }

    fn run<T: HaloElem>(&mut self, fields: &mut [AnyField<'_>]) -> Result<(), HaloError> {
        let mut views: Vec<&mut Field<'_, T>> = Vec::with_capacity(fields.len());
        for any in fields.iter_mut() {
            match T::field_mut(any) {
                Some(f) => views.push(f),
                None => {
                    return Err(HaloError::MixedElemKind {
                        position: views.len() + 1,
                        expected: T::KIND.name(),
                        found: any.kind().name(),
                    })
                }
            }
        }

        let shapes: Vec<([usize; NDIMS], usize)> =
            views.iter().map(|f| (f.extents(), f.ndims())).collect();
        self.pool.ensure_fields::<T>(&shapes)?;
        self.iwrite.widen(views.len());
        self.iread.widen(views.len());
        self.ensure_device_scratch::<T>(&views, &shapes)?;

        for dim in 0..NDIMS {
            for side in Side::ALL {
                if !self.topo.has_neighbor(side, dim) {
                    continue;
                }
                for (i, f) in views.iter().enumerate() {
                    if self.ol(dim, f) < 2 {
                        continue;
                    }
                    self.iwrite.arm(side, dim, i)?;
                    self.submit_pack(side, dim, i, f)?;
                }
            }
            match self.topo.classify(dim)? {
                DimKind::Remote => self.remote_dim(dim, &mut views)?,
                DimKind::Local => self.local_dim(dim, &mut views)?,
            }
        }
        Ok(())
    }

    fn remote_dim<T: HaloElem>(
        &mut self,
        dim: usize,
        views: &mut [&mut Field<'_, T>],
    ) -> Result<(), HaloError> {
        let n = views.len();
        let mut rreqs: [Vec<Option<C::RecvHandle>>; 2] = [fill_none(n), fill_none(n)];
        let mut sreqs: [Vec<Option<C::SendHandle>>; 2] = [fill_none(n), fill_none(n)];

        // Receives first, high side before low side: in a two-process
        // periodic ring both sides name the same peer and the reversed
        // posting order pairs them with the forward-posted sends.
        for side in Side::REVERSED {
            if !self.topo.has_neighbor(side, dim) {
                continue;
            }
            for (i, f) in views.iter().enumerate() {
                rreqs[side.index()][i] = self.irecv_halo(side, dim, i, f);
            }
        }

        for side in Side::ALL {
            if !self.topo.has_neighbor(side, dim) {
                continue;
            }
            for (i, f) in views.iter().enumerate() {
                if self.ol(dim, f) < 2 {
                    continue;
                }
                self.wait_iwrite(side, dim, i, f)?;
                sreqs[side.index()][i] = self.isend_halo(side, dim, i, f);
            }
        }

        // A completed receive has delivered its plane into the posted recv
        // buffer already; only the unpack remains.
        for side in Side::REVERSED {
            for (i, f) in views.iter_mut().enumerate() {
                let Some(h) = rreqs[side.index()][i].take() else {
                    continue;
                };
                h.wait()?;
                self.iread.arm(side, dim, i)?;
                self.submit_unpack(side, dim, i, f)?;
            }
        }

        for side in Side::REVERSED {
            for (i, f) in views.iter_mut().enumerate() {
                if self.iread.is_armed(side, i) {
                    self.wait_iread(side, dim, i, f)?;
                }
            }
        }

        for side in Side::ALL {
            for req in sreqs[side.index()].iter_mut() {
                if let Some(h) = req.take() {
                    h.wait()?;
                }
            }
        }
        Ok(())
    }

    fn local_dim<T: HaloElem>(
        &mut self,
        dim: usize,
        views: &mut [&mut Field<'_, T>],
    ) -> Result<(), HaloError> {
        for side in Side::ALL {
            for (i, f) in views.iter_mut().enumerate() {
                if self.ol(dim, f) < 2 {
                    continue;
                }
                self.wait_iwrite(side, dim, i, f)?;
                self.sendrecv_halo_local(side, dim, i, f)?;
                let opp = side.opposite();
                self.iread.arm(opp, dim, i)?;
                self.submit_unpack(opp, dim, i, f)?;
                self.wait_iread(opp, dim, i, f)?;
            }
        }
        Ok(())
    }

    /// Post the receive for (side, dim, field). `None` when the field has no
    /// halo along `dim` or no neighbour exists there.
    fn irecv_halo<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        f: &Field<'_, T>,
    ) -> Option<C::RecvHandle> {
        let peer = self.topo.neighbor(side, dim)?;
        if self.ol(dim, f) < 2 {
            return None;
        }
        let nbytes = halo_size(dim, f.extents()) * size_of::<T>();
        let tag = self.opts.tag;
        #[cfg(feature = "cuda")]
        if f.residency() == Residency::Cuda && self.opts.cuda_aware_for(dim) {
            let scratch = self.cuda.as_mut()?;
            return Some(self.comm.irecv(peer, tag, scratch.recv_bytes_mut(side, i, nbytes)));
        }
        Some(
            self.comm
                .irecv(peer, tag, self.pool.recv_slot_mut(side, i).bytes_mut(nbytes)),
        )
    }

    /// Post the send for (side, dim, field); the pack must have completed.
    fn isend_halo<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        f: &Field<'_, T>,
    ) -> Option<C::SendHandle> {
        let peer = self.topo.neighbor(side, dim)?;
        if self.ol(dim, f) < 2 {
            return None;
        }
        let nbytes = halo_size(dim, f.extents()) * size_of::<T>();
        let tag = self.opts.tag;
        #[cfg(feature = "cuda")]
        if f.residency() == Residency::Cuda && self.opts.cuda_aware_for(dim) {
            let scratch = self.cuda.as_ref()?;
            return Some(self.comm.isend(peer, tag, scratch.send_bytes(side, i, nbytes)));
        }
        Some(
            self.comm
                .isend(peer, tag, self.pool.send_slot(side, i).bytes(nbytes)),
        )
    }

    /// In-process exchange for a self-neighbour dimension: send slot of
    /// `side` into the recv slot of the opposite side.
    fn sendrecv_halo_local<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        f: &Field<'_, T>,
    ) -> Result<(), HaloError> {
        let nbytes = halo_size(dim, f.extents()) * size_of::<T>();
        match f.residency() {
            Residency::Host => {
                self.pool.copy_send_to_opposite_recv(side, i, nbytes);
                Ok(())
            }
            #[cfg(feature = "cuda")]
            Residency::Cuda => {
                if self.opts.cuda_aware_for(dim) {
                    self.cuda_scratch()?.local_copy(side, i, nbytes)
                } else {
                    self.pool.copy_send_to_opposite_recv(side, i, nbytes);
                    Ok(())
                }
            }
            #[cfg(feature = "wgpu")]
            Residency::Wgpu => {
                self.pool.copy_send_to_opposite_recv(side, i, nbytes);
                Ok(())
            }
        }
    }

    /// Submission half of a pack handle. Host fields only record the handle;
    /// device fields enqueue their kernel or staged copy now, without
    /// synchronizing anything.
    fn submit_pack<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        f: &Field<'_, T>,
    ) -> Result<(), HaloError> {
        match f.residency() {
            Residency::Host => Ok(()),
            #[cfg(feature = "cuda")]
            Residency::Cuda => {
                let ol = self.ol(dim, f);
                let aware = self.opts.cuda_aware_for(dim);
                let dev = f.cuda().ok_or_else(residency_mismatch)?;
                let scratch = self
                    .cuda
                    .as_mut()
                    .ok_or_else(|| missing_scratch("cuda"))?;
                scratch.submit_pack(side, dim, i, dev, ol, aware, &mut self.pool)
            }
            #[cfg(feature = "wgpu")]
            Residency::Wgpu => {
                let ol = self.ol(dim, f);
                let dev = f.wgpu().ok_or_else(residency_mismatch)?;
                let scratch = self
                    .wgpu
                    .as_mut()
                    .ok_or_else(|| missing_scratch("wgpu"))?;
                scratch.submit_pack(side, dim, i, dev, ol)
            }
        }
    }

    /// Submission half of an unpack handle; the receive has completed.
    fn submit_unpack<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        f: &mut Field<'_, T>,
    ) -> Result<(), HaloError> {
        match f.residency() {
            Residency::Host => Ok(()),
            #[cfg(feature = "cuda")]
            Residency::Cuda => {
                let aware = self.opts.cuda_aware_for(dim);
                let dev = f.cuda_mut().ok_or_else(residency_mismatch)?;
                let scratch = self
                    .cuda
                    .as_mut()
                    .ok_or_else(|| missing_scratch("cuda"))?;
                scratch.submit_unpack(side, dim, i, dev, aware, &mut self.pool)
            }
            #[cfg(feature = "wgpu")]
            Residency::Wgpu => {
                let dev = f.wgpu_mut().ok_or_else(residency_mismatch)?;
                let scratch = self
                    .wgpu
                    .as_mut()
                    .ok_or_else(|| missing_scratch("wgpu"))?;
                scratch.submit_unpack(side, dim, i, dev, &mut self.pool)
            }
        }
    }

    /// Await a pack handle. For host fields this *is* the pack: the recorded
    /// job runs inline here, on the awaiting thread. For device fields it
    /// synchronizes the stream the submission enqueued on.
    fn wait_iwrite<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        f: &Field<'_, T>,
    ) -> Result<(), HaloError> {
        self.iwrite.complete(side, dim, i)?;
        match f.residency() {
            Residency::Host => {
                let size = f.extents();
                let ol = self.ol(dim, f);
                let ranges = send_ranges(side, dim, ol, size);
                let elems = halo_size(dim, size);
                let src = f.host().ok_or_else(residency_mismatch)?;
                pack_plane(
                    dim,
                    src,
                    size,
                    &ranges,
                    self.pool.send_slot_mut(side, i).view_mut::<T>(elems),
                    self.opts.thread_copy_threshold,
                );
                Ok(())
            }
            #[cfg(feature = "cuda")]
            Residency::Cuda => self.cuda_scratch()?.sync_stream(side, i),
            #[cfg(feature = "wgpu")]
            Residency::Wgpu => {
                let scratch = self
                    .wgpu
                    .as_mut()
                    .ok_or_else(|| missing_scratch("wgpu"))?;
                scratch.sync(side, i, &mut self.pool)
            }
        }
    }

    /// Await an unpack handle; inline host scatter or stream sync.
    fn wait_iread<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        f: &mut Field<'_, T>,
    ) -> Result<(), HaloError> {
        self.iread.complete(side, dim, i)?;
        match f.residency() {
            Residency::Host => {
                let size = f.extents();
                let ranges = recv_ranges(side, dim, size);
                let elems = halo_size(dim, size);
                let threshold = self.opts.thread_copy_threshold;
                let src = self.pool.recv_slot(side, i).view::<T>(elems);
                let dst = f.host_mut().ok_or_else(residency_mismatch)?;
                unpack_plane(dim, src, size, &ranges, dst, threshold);
                Ok(())
            }
            #[cfg(feature = "cuda")]
            Residency::Cuda => self.cuda_scratch()?.sync_stream(side, i),
            #[cfg(feature = "wgpu")]
            Residency::Wgpu => {
                let scratch = self
                    .wgpu
                    .as_mut()
                    .ok_or_else(|| missing_scratch("wgpu"))?;
                scratch.sync(side, i, &mut self.pool)
            }
        }
    }

    #[allow(unused_variables)]
    fn ensure_device_scratch<T: HaloElem>(
        &mut self,
        views: &[&mut Field<'_, T>],
        shapes: &[([usize; NDIMS], usize)],
    ) -> Result<(), HaloError> {
        #[cfg(feature = "cuda")]
        {
            let any_cuda = views.iter().any(|f| f.residency() == Residency::Cuda);
            if any_cuda {
                let staged = (0..NDIMS).any(|d| !self.opts.cuda_aware_for(d));
                if self.cuda.is_none() {
                    let ctx = views
                        .iter()
                        .find_map(|f| f.cuda())
                        .map(|d| d.context())
                        .ok_or_else(residency_mismatch)?;
                    self.cuda = Some(crate::gpu::cuda::CudaScratch::new(ctx)?);
                }
                let scratch = self
                    .cuda
                    .as_mut()
                    .ok_or_else(|| missing_scratch("cuda"))?;
                scratch.ensure::<T>(shapes, &mut self.pool, staged)?;
            }
        }
        #[cfg(feature = "wgpu")]
        {
            let any_wgpu = views.iter().any(|f| f.residency() == Residency::Wgpu);
            if any_wgpu {
                if self.wgpu.is_none() {
                    let gpu = views
                        .iter()
                        .find_map(|f| f.wgpu())
                        .map(|d| d.gpu())
                        .ok_or_else(residency_mismatch)?;
                    self.wgpu = Some(crate::gpu::wgpu::WgpuScratch::new(gpu)?);
                }
                let scratch = self
                    .wgpu
                    .as_mut()
                    .ok_or_else(|| missing_scratch("wgpu"))?;
                scratch.ensure::<T>(shapes)?;
            }
        }
        Ok(())
    }

    #[cfg(feature = "cuda")]
    fn cuda_scratch(&mut self) -> Result<&mut crate::gpu::cuda::CudaScratch, HaloError> {
        self.cuda.as_mut().ok_or_else(|| missing_scratch("cuda"))
    }
}

fn fill_none<H>(n: usize) -> Vec<Option<H>> {
    std::iter::repeat_with(|| None).take(n).collect()
}

fn residency_mismatch() -> HaloError {
    HaloError::Device {
        backend: "gpu",
        detail: "field residency changed mid-call".into(),
    }
}

#[cfg(any(feature = "cuda", feature = "wgpu"))]
fn missing_scratch(backend: &'static str) -> HaloError {
    HaloError::BackendUnavailable {
        backend,
        detail: "device scratch not initialized for this call".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::field::AnyField;
    use crate::topology::CartesianTopology;

    fn periodic_1d(n: usize) -> CartesianTopology {
        CartesianTopology::single([true, false, false], [n, 1, 1], [2, 0, 0])
    }

    fn exchanger(topo: CartesianTopology) -> HaloExchanger<NoComm> {
        HaloExchanger::new(topo, NoComm)
    }

    #[test]
    fn duplicate_field_points_at_position_two() {
        let mut ex = exchanger(periodic_1d(10));
        let mut data = vec![0.0f64; 10];
        // Two views of the same buffer, built from raw parts to model the
        // caller passing one array twice.
        let ptr = data.as_mut_ptr();
        let a = unsafe { std::slice::from_raw_parts_mut(ptr, 10) };
        let b = unsafe { std::slice::from_raw_parts_mut(ptr, 10) };
        let mut fields = [
            AnyField::from(Field::from_host(a, &[10]).unwrap()),
            AnyField::from(Field::from_host(b, &[10]).unwrap()),
        ];
        let err = ex.update_halo(&mut fields).unwrap_err();
        assert!(matches!(err, HaloError::AliasedField { position: 2 }));
        assert!(err.to_string().contains("position 2"));
    }

    #[test]
    fn field_without_halo_is_rejected() {
        let mut ex = exchanger(CartesianTopology::single(
            [true, true, true],
            [8, 8, 8],
            [1, 1, 1],
        ));
        let mut data = vec![0.0f32; 512];
        let mut fields = [AnyField::from(
            Field::from_host(&mut data, &[8, 8, 8]).unwrap(),
        )];
        let err = ex.update_halo(&mut fields).unwrap_err();
        assert!(matches!(err, HaloError::NoHaloOverlap { position: 1 }));
    }

    #[test]
    fn mixed_element_kinds_point_at_first_offender() {
        let mut ex = exchanger(periodic_1d(10));
        let mut a = vec![0.0f64; 10];
        let mut b = vec![0.0f32; 10];
        let mut fields = [
            AnyField::from(Field::from_host(&mut a, &[10]).unwrap()),
            AnyField::from(Field::from_host(&mut b, &[10]).unwrap()),
        ];
        let err = ex.update_halo(&mut fields).unwrap_err();
        assert!(matches!(
            err,
            HaloError::MixedElemKind {
                position: 2,
                expected: "f64",
                found: "f32",
            }
        ));
    }

    #[test]
    fn empty_call_is_a_no_op() {
        let mut ex = exchanger(periodic_1d(10));
        ex.update_halo(&mut []).unwrap();
        assert_eq!(ex.pool().grow_count(), 0);
    }

    #[test]
    fn one_d_periodic_wraps_both_halos() {
        // Scenario: length 10, overlap 2, periodic. Interior 1..=8 numbered;
        // afterwards each halo cell mirrors the far interior row.
        let mut ex = exchanger(periodic_1d(10));
        let mut data: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut fields = [AnyField::from(
            Field::from_host(&mut data, &[10]).unwrap(),
        )];
        ex.update_halo(&mut fields).unwrap();
        assert_eq!(data[0], 8.0);
        assert_eq!(data[9], 1.0);
        // Interior untouched.
        assert_eq!(&data[1..9], &[1., 2., 3., 4., 5., 6., 7., 8.]);
    }

    #[test]
    fn teardown_resets_pool() {
        let mut ex = exchanger(periodic_1d(10));
        let mut data = vec![0.0f64; 10];
        let mut fields = [AnyField::from(
            Field::from_host(&mut data, &[10]).unwrap(),
        )];
        ex.update_halo(&mut fields).unwrap();
        assert!(ex.pool().grow_count() > 0);
        ex.free_update_halo_buffers();
        assert_eq!(ex.pool().grow_count(), 0);
        assert_eq!(ex.pool().field_capacity(), 0);
        // Usable again after teardown.
        let mut fields = [AnyField::from(
            Field::from_host(&mut data, &[10]).unwrap(),
        )];
        ex.update_halo(&mut fields).unwrap();
    }
}
