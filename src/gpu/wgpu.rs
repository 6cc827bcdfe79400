//! Portable GPU backend over wgpu, covering hardware without native
//! bindings (notably AMD).
//!
//! Packing and unpacking always run as compute kernels on the device; the
//! packed plane is then staged through a mapped host buffer into the shared
//! pool. Device-aware transport does not exist on this backend, so the
//! mirror decision is unconditional.
//!
//! The kernels copy 4-byte granules, which keeps one pipeline valid for
//! every element type whose size is a multiple of four; `u16` fields are
//! rejected here.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::buffer::BufferPool;
use crate::error::HaloError;
use crate::field::{halo_size, max_halo_elems, recv_ranges, send_ranges, HaloElem,
    ALLOC_GRANULARITY};
use crate::topology::{Side, NDIMS, NNEIGHBORS_PER_DIM};

const PLANE_SHADER: &str = r#"
struct Params {
    nx: u32,
    ny: u32,
    x0: u32,
    y0: u32,
    z0: u32,
    lenx: u32,
    leny: u32,
    lenz: u32,
    elem_words: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> p: Params;

fn field_index(tx: u32, ty: u32, tz: u32) -> u32 {
    return (p.x0 + tx) + p.nx * ((p.y0 + ty) + p.ny * (p.z0 + tz));
}

@compute @workgroup_size(64)
fn pack_plane(@builtin(global_invocation_id) gid: vec3<u32>) {
    let total = p.lenx * p.leny * p.lenz;
    let idx = gid.x;
    if (idx >= total) {
        return;
    }
    let tx = idx % p.lenx;
    let rest = idx / p.lenx;
    let s = field_index(tx, rest % p.leny, rest / p.leny);
    for (var w: u32 = 0u; w < p.elem_words; w = w + 1u) {
        dst[idx * p.elem_words + w] = src[s * p.elem_words + w];
    }
}

@compute @workgroup_size(64)
fn unpack_plane(@builtin(global_invocation_id) gid: vec3<u32>) {
    let total = p.lenx * p.leny * p.lenz;
    let idx = gid.x;
    if (idx >= total) {
        return;
    }
    let tx = idx % p.lenx;
    let rest = idx / p.lenx;
    let d = field_index(tx, rest % p.leny, rest / p.leny);
    for (var w: u32 = 0u; w < p.elem_words; w = w + 1u) {
        dst[d * p.elem_words + w] = src[idx * p.elem_words + w];
    }
}
"#;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct Params {
    nx: u32,
    ny: u32,
    x0: u32,
    y0: u32,
    z0: u32,
    lenx: u32,
    leny: u32,
    lenz: u32,
    elem_words: u32,
    _pad: [u32; 3],
}

fn wgpu_err(detail: impl std::fmt::Display) -> HaloError {
    HaloError::Device {
        backend: "wgpu",
        detail: detail.to_string(),
    }
}

fn elem_words<T: HaloElem>() -> Result<u32, HaloError> {
    let es = std::mem::size_of::<T>();
    if es % 4 != 0 {
        return Err(HaloError::UnsupportedElem {
            kind: T::KIND.name(),
            backend: "wgpu",
        });
    }
    Ok((es / 4) as u32)
}

/// Device and queue handles shared by fields and scratch.
#[derive(Clone)]
pub struct WgpuGpu {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

static FIELD_IDS: AtomicUsize = AtomicUsize::new(1);

/// A device-resident field stored in a storage buffer.
pub struct WgpuField<T: HaloElem> {
    gpu: WgpuGpu,
    buffer: wgpu::Buffer,
    id: usize,
    shape: Vec<usize>,
    size: [usize; NDIMS],
    _pd: PhantomData<T>,
}

impl<T: HaloElem> WgpuField<T> {
    /// Upload a host array of the given shape to the device.
    pub fn from_host(gpu: &WgpuGpu, host: &[T], shape: &[usize]) -> Result<Self, HaloError> {
        elem_words::<T>()?;
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
        let buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("grid-halo/WgpuField"),
                contents: bytemuck::cast_slice(host),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
        Ok(Self {
            gpu: gpu.clone(),
            buffer,
            id: FIELD_IDS.fetch_add(1, Ordering::Relaxed),
            shape: shape.to_vec(),
            size,
            _pd: PhantomData,
        })
    }

    /// Download the field into a host vector.
    pub fn to_host(&self) -> Result<Vec<T>, HaloError> {
        let bytes = read_buffer(&self.gpu, &self.buffer, self.len() * std::mem::size_of::<T>())?;
        Ok(bytemuck::cast_slice(&bytes).to_vec())
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

    pub(crate) fn gpu(&self) -> WgpuGpu {
        self.gpu.clone()
    }

    pub(crate) fn buffer_addr(&self) -> usize {
        self.id
    }
}

/// Blocking readback through a MAP_READ staging buffer.
fn read_buffer(gpu: &WgpuGpu, src: &wgpu::Buffer, nbytes: usize) -> Result<Vec<u8>, HaloError> {
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("grid-halo/readback"),
        size: nbytes as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut enc = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("grid-halo/read_buffer"),
        });
    enc.copy_buffer_to_buffer(src, 0, &staging, 0, nbytes as u64);
    gpu.queue.submit(Some(enc.finish()));
    map_and_copy(gpu, &staging, nbytes)
}

fn map_and_copy(gpu: &WgpuGpu, staging: &wgpu::Buffer, nbytes: usize) -> Result<Vec<u8>, HaloError> {
    let slice = staging.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        sender.send(res).ok();
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    pollster::block_on(receiver.receive())
        .ok_or_else(|| wgpu_err("map_async callback dropped"))?
        .map_err(|e| wgpu_err(format!("buffer mapping failed: {e:?}")))?;
    let data = slice.get_mapped_range();
    let mut out = vec![0u8; nbytes];
    out.copy_from_slice(&data);
    drop(data);
    staging.unmap();
    Ok(out)
}

enum Pending {
    /// A pack ran on the device; its plane sits in the staging buffer and
    /// still has to land in the host pool slot.
    PackReadback { nbytes: usize },
    /// An unpack was submitted; the wait only has to drain the queue.
    Unpack,
}

struct ScratchBuf {
    storage: wgpu::Buffer,
    staging: wgpu::Buffer,
    bytes: usize,
    pending: Option<Pending>,
}

fn make_buf(gpu: &WgpuGpu, bytes: usize) -> ScratchBuf {
    let storage = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("grid-halo/scratch"),
        size: bytes as u64,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("grid-halo/scratch staging"),
        size: bytes as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    ScratchBuf {
        storage,
        staging,
        bytes,
        pending: None,
    }
}

/// Persistent device scratch keyed like the host pool.
pub struct WgpuScratch {
    gpu: WgpuGpu,
    pack: wgpu::ComputePipeline,
    unpack: wgpu::ComputePipeline,
    send: Vec<[Option<ScratchBuf>; NNEIGHBORS_PER_DIM]>,
    recv: Vec<[Option<ScratchBuf>; NNEIGHBORS_PER_DIM]>,
}

impl WgpuScratch {
    pub(crate) fn new(gpu: WgpuGpu) -> Result<Self, HaloError> {
        let shader = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("grid-halo/plane.wgsl"),
                source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(PLANE_SHADER)),
            });
        let make = |entry: &str| {
            gpu.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("grid-halo/plane"),
                    layout: None,
                    module: &shader,
                    entry_point: entry,
                })
        };
        let pack = make("pack_plane");
        let unpack = make("unpack_plane");
        Ok(Self {
            gpu,
            pack,
            unpack,
            send: Vec::new(),
            recv: Vec::new(),
        })
    }

    /// Widen and size the device scratch and its staging mirrors.
    pub(crate) fn ensure<T: HaloElem>(
        &mut self,
        shapes: &[([usize; NDIMS], usize)],
    ) -> Result<(), HaloError> {
        elem_words::<T>()?;
        while self.send.len() < shapes.len() {
            self.send.push(Default::default());
            self.recv.push(Default::default());
        }
        for (i, &(size, ndims)) in shapes.iter().enumerate() {
            let elems = max_halo_elems(size, ndims);
            let bytes =
                elems.div_ceil(ALLOC_GRANULARITY) * ALLOC_GRANULARITY * std::mem::size_of::<T>();
            for side in Side::ALL {
                for table in [&mut self.send, &mut self.recv] {
                    let slot = &mut table[i][side.index()];
                    let have = slot.as_ref().map(|s| s.bytes).unwrap_or(0);
                    if have < bytes {
                        *slot = Some(make_buf(&self.gpu, bytes));
                    }
                }
            }
        }
        Ok(())
    }

    fn params<T: HaloElem>(
        size: [usize; NDIMS],
        ranges: &[std::ops::Range<usize>; NDIMS],
    ) -> Result<Params, HaloError> {
        Ok(Params {
            nx: size[0] as u32,
            ny: size[1] as u32,
            x0: ranges[0].start as u32,
            y0: ranges[1].start as u32,
            z0: ranges[2].start as u32,
            lenx: ranges[0].len() as u32,
            leny: ranges[1].len() as u32,
            lenz: ranges[2].len() as u32,
            elem_words: elem_words::<T>()?,
            _pad: [0; 3],
        })
    }

    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        src: &wgpu::Buffer,
        dst: &wgpu::Buffer,
        params: Params,
        copy_to_staging: Option<(&wgpu::Buffer, usize)>,
    ) {
        let ubuf = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("grid-halo/plane params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let layout = pipeline.get_bind_group_layout(0);
        let bind = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("grid-halo/plane bind"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: src.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dst.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: ubuf.as_entire_binding(),
                },
            ],
        });
        let mut enc = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grid-halo/plane pass"),
            });
        {
            let mut cpass = enc.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("grid-halo/plane"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &bind, &[]);
            let total = params.lenx * params.leny * params.lenz;
            cpass.dispatch_workgroups(total.div_ceil(64).max(1), 1, 1);
        }
        if let Some((staging, nbytes)) = copy_to_staging {
            enc.copy_buffer_to_buffer(dst, 0, staging, 0, nbytes as u64);
        }
        self.gpu.queue.submit(Some(enc.finish()));
    }

    /// Enqueue the pack kernel and the copy of its plane into the staging
    /// mirror. Nothing blocks here.
    pub(crate) fn submit_pack<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        dev: &WgpuField<T>,
        ol: usize,
    ) -> Result<(), HaloError> {
        let size = dev.extents();
        let ranges = send_ranges(side, dim, ol, size);
        let nbytes = halo_size(dim, size) * std::mem::size_of::<T>();
        let params = Self::params::<T>(size, &ranges)?;
        let slot = self.send[i][side.index()]
            .as_ref()
            .ok_or_else(|| wgpu_err("scratch slot missing"))?;
        self.dispatch(
            &self.pack,
            &dev.buffer,
            &slot.storage,
            params,
            Some((&slot.staging, nbytes)),
        );
        if let Some(slot) = self.send[i][side.index()].as_mut() {
            slot.pending = Some(Pending::PackReadback { nbytes });
        }
        Ok(())
    }

    /// Upload the received plane and enqueue the unpack kernel.
    pub(crate) fn submit_unpack<T: HaloElem>(
        &mut self,
        side: Side,
        dim: usize,
        i: usize,
        dev: &mut WgpuField<T>,
        pool: &mut BufferPool,
    ) -> Result<(), HaloError> {
        let size = dev.extents();
        let ranges = recv_ranges(side, dim, size);
        let nbytes = halo_size(dim, size) * std::mem::size_of::<T>();
        let params = Self::params::<T>(size, &ranges)?;
        let slot = self.recv[i][side.index()]
            .as_ref()
            .ok_or_else(|| wgpu_err("scratch slot missing"))?;
        self.gpu
            .queue
            .write_buffer(&slot.storage, 0, pool.recv_slot(side, i).bytes(nbytes));
        self.dispatch(&self.unpack, &slot.storage, &dev.buffer, params, None);
        if let Some(slot) = self.recv[i][side.index()].as_mut() {
            slot.pending = Some(Pending::Unpack);
        }
        Ok(())
    }

    /// Await the submitted work of (field, side): finish the pack readback
    /// into the host pool slot, or drain the unpack.
    pub(crate) fn sync(
        &mut self,
        side: Side,
        i: usize,
        pool: &mut BufferPool,
    ) -> Result<(), HaloError> {
        let n = side.index();
        if let Some(Pending::PackReadback { nbytes }) =
            self.send[i][n].as_mut().and_then(|s| s.pending.take())
        {
            let slot = self.send[i][n]
                .as_ref()
                .ok_or_else(|| wgpu_err("scratch slot missing"))?;
            let bytes = map_and_copy(&self.gpu, &slot.staging, nbytes)?;
            pool.send_slot_mut(side, i)
                .bytes_mut(nbytes)
                .copy_from_slice(&bytes);
            return Ok(());
        }
        if let Some(Pending::Unpack) = self.recv[i][n].as_mut().and_then(|s| s.pending.take()) {
            self.gpu.device.poll(wgpu::Maintain::Wait);
        }
        Ok(())
    }
}
