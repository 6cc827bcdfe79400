//! CUDA backend: device fields, per-(field, side) streams and scratch, PTX
//! pack/unpack kernels, pinned-host staging.
//!
//! Submission never blocks: packs and unpacks are enqueued on a dedicated
//! stream per (field, side) and the matching wait synchronizes that stream.
//! With device-aware transport the packed plane stays in device memory and
//! the message is posted on it directly; otherwise the plane is staged
//! through the registered host slot of the shared pool. For dimensions other
//! than the fastest axis the staged path skips the kernel entirely and moves
//! the strided plane with a driver-level 2-D async copy.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::Zeroable;
use cudarc::driver::{sys, CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream,
    DevicePtr, LaunchConfig};
use cudarc::nvrtc::compile_ptx;

use crate::buffer::BufferPool;
use crate::error::HaloError;
use crate::field::{halo_size, max_halo_elems, recv_ranges, send_ranges, ElemKind, HaloElem,
    ALLOC_GRANULARITY};
use crate::topology::{Side, NDIMS, NNEIGHBORS_PER_DIM};

fn cuda_err(detail: impl std::fmt::Display) -> HaloError {
    HaloError::Device {
        backend: "cuda",
        detail: detail.to_string(),
    }
}

fn cu_check(rc: sys::CUresult, what: &str) -> Result<(), HaloError> {
    if rc == sys::CUresult::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(cuda_err(format!("{what} failed: {rc:?}")))
    }
}

const fn cuda_type_name(kind: ElemKind) -> &'static str {
    match kind {
        ElemKind::F32 => "float",
        ElemKind::F64 => "double",
        ElemKind::I32 => "int",
        ElemKind::U16 => "unsigned short",
    }
}

/// One thread per plane point. The singleton axis contributes a zero term to
/// the buffer index, so a single kernel covers all three dimensions.
fn kernel_source(kind: ElemKind) -> String {
    let ty = cuda_type_name(kind);
    format!(
        r#"
extern "C" __global__ void pack_plane(const {ty}* src, {ty}* dst,
    int nx, int ny, int x0, int y0, int z0, int lenx, int leny, int lenz)
{{
    int tx = blockIdx.x * blockDim.x + threadIdx.x;
    int ty = blockIdx.y * blockDim.y + threadIdx.y;
    int tz = blockIdx.z * blockDim.z + threadIdx.z;
    if (tx >= lenx || ty >= leny || tz >= lenz) return;
    dst[tx + lenx * (ty + leny * tz)] =
        src[(x0 + tx) + nx * ((y0 + ty) + ny * (z0 + tz))];
}}

extern "C" __global__ void unpack_plane(const {ty}* src, {ty}* dst,
    int nx, int ny, int x0, int y0, int z0, int lenx, int leny, int lenz)
{{
    int tx = blockIdx.x * blockDim.x + threadIdx.x;
    int ty = blockIdx.y * blockDim.y + threadIdx.y;
    int tz = blockIdx.z * blockDim.z + threadIdx.z;
    if (tx >= lenx || ty >= leny || tz >= lenz) return;
    dst[(x0 + tx) + nx * ((y0 + ty) + ny * (z0 + tz))] =
        src[tx + lenx * (ty + leny * tz)];
}}
"#
    )
}

/// A plane perpendicular to the fastest axis is maximally strided: one thread
/// per point, grouped on the second axis for coalescing. Other planes keep
/// warps on the fastest axis.
fn launch_config(dim: usize, lens: [usize; NDIMS]) -> LaunchConfig {
    let block: (u32, u32, u32) = if dim == 0 { (1, 32, 1) } else { (32, 1, 1) };
    let grid = (
        (lens[0] as u32).div_ceil(block.0),
        (lens[1] as u32).div_ceil(block.1),
        (lens[2] as u32).div_ceil(block.2),
    );
    LaunchConfig {
        grid_dim: grid,
        block_dim: block,
        shared_mem_bytes: 0,
    }
}

struct PlaneKernels {
    _module: Arc<CudaModule>,
    pack: CudaFunction,
    unpack: CudaFunction,
}

/// A device-resident field.
///
/// Storage is raw bytes; the element type only shapes the copies and the
/// kernel instantiation, which keeps every supported type on one code path.
pub struct CudaField<T: HaloElem> {
    ctx: Arc<CudaContext>,
    data: CudaSlice<u8>,
    addr: u64,
    shape: Vec<usize>,
    size: [usize; NDIMS],
    _pd: PhantomData<T>,
}

impl<T: HaloElem> CudaField<T> {
    /// Upload a host array of the given shape to the device.
    pub fn from_host(
        ctx: &Arc<CudaContext>,
        host: &[T],
        shape: &[usize],
    ) -> Result<Self, HaloError> {
        if shape.is_empty() || shape.len() > NDIMS {
            return Err(HaloError::UnsupportedRank { ndims: shape.len() });
        }
        let mut size = [1usize; NDIMS];
        size[..shape.len()].copy_from_slice(shape);
        if size.iter().product::<usize>() != host.len() {
            return Err(HaloError::ShapeMismatch {
                nx: size[0],
                ny: size[1],
                nz: size[2],
                len: host.len(),
            });
        }
        let stream = ctx.default_stream();
        let bytes: &[u8] = bytemuck::cast_slice(host);
        let mut data = unsafe { stream.alloc::<u8>(bytes.len()) }.map_err(cuda_err)?;
        stream.memcpy_htod(bytes, &mut data).map_err(cuda_err)?;
        stream.synchronize().map_err(cuda_err)?;
        let addr = *data.device_ptr();
        Ok(Self {
            ctx: ctx.clone(),
            data,
            addr,
            shape: shape.to_vec(),
            size,
            _pd: PhantomData,
        })
    }

    /// Download the field into a host vector.
    pub fn to_host(&self) -> Result<Vec<T>, HaloError> {
        let stream = self.ctx.default_stream();
        let mut out = vec![T::zeroed(); self.len()];
        stream
            .memcpy_dtoh(&self.data, bytemuck::cast_slice_mut(&mut out))
            .map_err(cuda_err)?;
        stream.synchronize().map_err(cuda_err)?;
        Ok(out)
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.size.iter().product()
    }

    /// Whether the field holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape as constructed.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub(crate) fn extents(&self) -> [usize; NDIMS] {
        self.size
    }

    pub(crate) fn context(&self) -> Arc<CudaContext> {
        self.ctx.clone()
    }

    pub(crate) fn device_addr(&self) -> usize {
        self.addr as usize
    }
}

#[derive(Default)]
struct SlotPair {
    buf: Option<CudaSlice<u8>>,
    addr: u64,
    /// (ptr, len) of the registered host mirror, staged paths only.
    host_reg: Option<(usize, usize)>,
}

impl SlotPair {
    fn unregister(&mut self) {
        if let Some((ptr, _)) = self.host_reg.take() {
            unsafe {
                let _ = sys::cuMemHostUnregister(ptr as *mut std::ffi::c_void);
            }
        }
    }
}

/// Persistent device scratch keyed like the host pool.
pub struct CudaScratch {
    ctx: Arc<CudaContext>,
    streams: Vec<[Arc<CudaStream>; NNEIGHBORS_PER_DIM]>,
    send: Vec<[SlotPair; NNEIGHBORS_PER_DIM]>,
    recv: Vec<[SlotPair; NNEIGHBORS_PER_DIM]>,
    kernels: HashMap<ElemKind, PlaneKernels>,
}

impl CudaScratch {
    pub(crate) fn new(ctx: Arc<CudaContext>) -> Result<Self, HaloError> {
        Ok(Self {
            ctx,
            streams: Vec::new(),
            send: Vec::new(),
            recv: Vec::new(),
            kernels: HashMap::new(),
        })
    }

    /// Widen and size the device slots, compile kernels for `T` on first
    /// use, and (re-)register the host mirrors when staging is in play.
    pub(crate) fn ensure<T: HaloElem>(
        &mut self,
        shapes: &[([usize; NDIMS], usize)],
        pool: &mut BufferPool,
        staged: bool,
    ) -> Result<(), HaloError> {
        if !self.kernels.contains_key(&T::KIND) {
            let ptx = compile_ptx(kernel_source(T::KIND)).map_err(cuda_err)?;
            let module = self.ctx.load_module(ptx).map_err(cuda_err)?;
            let pack = module.load_function("pack_plane").map_err(cuda_err)?;
            let unpack = module.load_function("unpack_plane").map_err(cuda_err)?;
            self.kernels.insert(
                T::KIND,
                PlaneKernels {
                    _module: module,
                    pack,
                    unpack,
                },
            );
        }

        while self.streams.len() < shapes.len() {
            let a = self.ctx.new_stream().map_err(cuda_err)?;
            let b = self.ctx.new_stream().map_err(cuda_err)?;
            self.streams.push([a, b]);
            self.send.push(Default::default());
            self.recv.push(Default::default());
        }

        let stream = self.ctx.default_stream();
        for (i, &(size, ndims)) in shapes.iter().enumerate() {
            let elems = max_halo_elems(size, ndims);
            let bytes =
                elems.div_ceil(ALLOC_GRANULARITY) * ALLOC_GRANULARITY * std::mem::size_of::<T>();
            for side in Side::ALL {
                let n = side.index();
                for (slots, host_slot) in [
                    (&mut self.send[i][n], pool.send_slot(side, i)),
                    (&mut self.recv[i][n], pool.recv_slot(side, i)),
                ] {
                    let have = slots.buf.as_ref().map(|b| b.len()).unwrap_or(0);
                    if have < bytes {
                        let buf = unsafe { stream.alloc::<u8>(bytes) }.map_err(cuda_err)?;
                        slots.addr = *buf.device_ptr();
                        slots.buf = Some(buf);
                    }
                    if staged {
                        let want = (host_slot.base_addr(), host_slot.capacity_bytes());
                        if slots.host_reg != Some(want) {
                            slots.unregister();
                            cu_check(
                                unsafe {
                                    sys::cuMemHostRegister_v2(
                                        want.0 as *mut std::ffi::c_void,
                                        want.1,
                                        0,
                                    )
                                },
                                "cuMemHostRegister",
                            )?;
                            slots.host_reg = Some(want);
                        }
                    } else {
                        slots.unregister();
                    }
                }
            }
        }
        Ok(())
    }

    fn kernels(&self, kind: ElemKind) -> Result<&PlaneKernels, HaloError> {
        self.kernels
            .get(&kind)
            .ok_or_else(|| cuda_err("kernels not compiled for element kind"))
    }

    fn slot_addr(slots: &[SlotPair], side: Side) -> Result<u64, HaloError> {
        let s = &slots[side.index()];
        if s.buf.is_some() {
            Ok(s.addr)
        } else {
            Err(cuda_err("device slot missing"))
        }
    }

    /// Enqueue the pack for (side, dim, field) on its stream.
    pub(crate) fn submit_pack<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        dev: &CudaField<T>,
        ol: usize,
        aware: bool,
        pool: &mut BufferPool,
    ) -> Result<(), HaloError> {
        let size = dev.extents();
        let ranges = send_ranges(side, dim, ol, size);
        let nbytes = halo_size(dim, size) * std::mem::size_of::<T>();
        let stream = self.streams[i][side.index()].clone();
        if dim == 0 || aware {
            let dst = Self::slot_addr(&self.send[i], side)?;
            self.launch(T::KIND, false, &stream, dim, dev.addr, dst, size, &ranges)?;
            if !aware {
                let buf = self.send[i][side.index()]
                    .buf
                    .as_ref()
                    .ok_or_else(|| cuda_err("device slot missing"))?;
                let host = pool.send_slot_mut(side, i).bytes_mut(nbytes);
                stream
                    .memcpy_dtoh(&buf.slice(0..nbytes), host)
                    .map_err(cuda_err)?;
            }
        } else {
            // Staged off-axis plane: strided driver copy, no kernel.
            let host = pool.send_slot_mut(side, i).bytes_mut(nbytes);
            self.memcpy_2d_async::<T>(&stream, dev.addr, host.as_mut_ptr(), size, &ranges, true)?;
        }
        Ok(())
    }

    /// Enqueue the unpack for (side, dim, field) on its stream.
    pub(crate) fn submit_unpack<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        dev: &mut CudaField<T>,
        aware: bool,
        pool: &mut BufferPool,
    ) -> Result<(), HaloError> {
        let size = dev.extents();
        let ranges = recv_ranges(side, dim, size);
        let nbytes = halo_size(dim, size) * std::mem::size_of::<T>();
        let stream = self.streams[i][side.index()].clone();
        if dim == 0 || aware {
            if !aware {
                let host = pool.recv_slot(side, i).bytes(nbytes);
                let buf = self.recv[i][side.index()]
                    .buf
                    .as_mut()
                    .ok_or_else(|| cuda_err("device slot missing"))?;
                stream
                    .memcpy_htod(host, &mut buf.slice_mut(0..nbytes))
                    .map_err(cuda_err)?;
            }
            let src = Self::slot_addr(&self.recv[i], side)?;
            self.launch(T::KIND, true, &stream, dim, src, dev.addr, size, &ranges)?;
        } else {
            let host = pool.recv_slot_mut(side, i).bytes_mut(nbytes);
            self.memcpy_2d_async::<T>(&stream, dev.addr, host.as_mut_ptr(), size, &ranges, false)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn launch(
        &self,
        kind: ElemKind,
        unpack: bool,
        stream: &Arc<CudaStream>,
        dim: usize,
        src: u64,
        dst: u64,
        size: [usize; NDIMS],
        ranges: &[std::ops::Range<usize>; NDIMS],
    ) -> Result<(), HaloError> {
        let k = self.kernels(kind)?;
        let func = if unpack { &k.unpack } else { &k.pack };
        let lens = [ranges[0].len(), ranges[1].len(), ranges[2].len()];
        let cfg = launch_config(dim, lens);
        let (nx, ny) = (size[0] as i32, size[1] as i32);
        let (x0, y0, z0) = (
            ranges[0].start as i32,
            ranges[1].start as i32,
            ranges[2].start as i32,
        );
        let (lenx, leny, lenz) = (lens[0] as i32, lens[1] as i32, lens[2] as i32);
        unsafe {
            stream
                .launch_builder(func)
                .arg(&src)
                .arg(&dst)
                .arg(&nx)
                .arg(&ny)
                .arg(&x0)
                .arg(&y0)
                .arg(&z0)
                .arg(&lenx)
                .arg(&leny)
                .arg(&lenz)
                .launch(cfg)
                .map_err(cuda_err)?;
        }
        Ok(())
    }

    /// Strided plane <-> pinned host, as one 2-D async copy. Device pitch is
    /// a full x-row times the y-extent between consecutive z-rows of the
    /// plane; the host side is densely packed.
    fn memcpy_2d_async<T: HaloElem>(
        &self,
        stream: &Arc<CudaStream>,
        dev_base: u64,
        host: *mut u8,
        size: [usize; NDIMS],
        ranges: &[std::ops::Range<usize>; NDIMS],
        to_host: bool,
    ) -> Result<(), HaloError> {
        let es = std::mem::size_of::<T>();
        let [nx, ny, _] = size;
        let dev_off =
            (ranges[0].start + nx * (ranges[1].start + ny * ranges[2].start)) * es;
        let dev_pitch = nx * ny * es;
        // y singleton: one x-row per z-slab. z singleton: the whole x-y block
        // is one contiguous row.
        let (width_elems, height) = if ranges[1].len() == 1 {
            (ranges[0].len(), ranges[2].len())
        } else {
            (ranges[0].len() * ranges[1].len(), 1)
        };
        let width_bytes = width_elems * es;
        let mut desc: sys::CUDA_MEMCPY2D = unsafe { std::mem::zeroed() };
        desc.WidthInBytes = width_bytes;
        desc.Height = height;
        if to_host {
            desc.srcMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_DEVICE;
            desc.srcDevice = dev_base + dev_off as u64;
            desc.srcPitch = dev_pitch;
            desc.dstMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_HOST;
            desc.dstHost = host as *mut std::ffi::c_void;
            desc.dstPitch = width_bytes;
        } else {
            desc.srcMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_HOST;
            desc.srcHost = host as *mut std::ffi::c_void;
            desc.srcPitch = width_bytes;
            desc.dstMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_DEVICE;
            desc.dstDevice = dev_base + dev_off as u64;
            desc.dstPitch = dev_pitch;
        }
        cu_check(
            unsafe { sys::cuMemcpy2DAsync_v2(&desc, stream.cu_stream()) },
            "cuMemcpy2DAsync",
        )
    }

    /// Device-to-device copy for self-neighbour dimensions, enqueued on the
    /// opposite side's stream so the following unpack is ordered behind it.
    pub(crate) fn local_copy(
        &mut self,
        side: Side,
        i: usize,
        nbytes: usize,
    ) -> Result<(), HaloError> {
        let opp = side.opposite();
        let stream = self.streams[i][opp.index()].clone();
        let src = self.send[i][side.index()]
            .buf
            .as_ref()
            .ok_or_else(|| cuda_err("device slot missing"))?;
        let dst = self.recv[i][opp.index()]
            .buf
            .as_mut()
            .ok_or_else(|| cuda_err("device slot missing"))?;
        stream
            .memcpy_dtod(&src.slice(0..nbytes), &mut dst.slice_mut(0..nbytes))
            .map_err(cuda_err)
    }

    /// Synchronize the stream of (field, side).
    pub(crate) fn sync_stream(&mut self, side: Side, i: usize) -> Result<(), HaloError> {
        self.streams[i][side.index()].synchronize().map_err(cuda_err)
    }

    /// Device bytes of the send slot, for device-aware sends.
    pub(crate) fn send_bytes(&self, side: Side, i: usize, nbytes: usize) -> &[u8] {
        let s = &self.send[i][side.index()];
        // Never dereferenced on the host: the slice only carries the device
        // address and length into a device-aware MPI library.
        unsafe { std::slice::from_raw_parts(s.addr as *const u8, nbytes) }
    }

    /// Device bytes of the recv slot, for device-aware receives.
    pub(crate) fn recv_bytes_mut(&mut self, side: Side, i: usize, nbytes: usize) -> &mut [u8] {
        let s = &self.recv[i][side.index()];
        unsafe { std::slice::from_raw_parts_mut(s.addr as *mut u8, nbytes) }
    }
}

impl Drop for CudaScratch {
    fn drop(&mut self) {
        for table in [&mut self.send, &mut self.recv] {
            for pair in table.iter_mut().flatten() {
                pair.unregister();
            }
        }
    }
}
