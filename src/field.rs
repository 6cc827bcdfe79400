//! Field model: borrowed N-dimensional numeric arrays and the plane
//! geometry of their halos.
//!
//! A [`Field`] borrows externally owned storage for the duration of a call;
//! the crate never owns field data. Axis 0 is the fastest-varying axis and
//! the linear index of `(ix, iy, iz)` is `ix + nx * (iy + ny * iz)`. Fields
//! of rank 1 or 2 behave as if padded with size-1 trailing axes.
//!
//! The element-type universe is closed: the sealed [`HaloElem`] trait admits
//! exactly the types the wire format and the scratch pool know how to carry.

use std::ops::Range;

use crate::error::HaloError;
use crate::topology::{Side, NDIMS};

/// Scratch capacity is rounded up to this many elements.
///
/// `ALLOC_GRANULARITY * sizeof(u16)` is a multiple of `sizeof(f64)`, so a
/// slot sized for a smaller element type never under-sizes a later view at a
/// larger one.
pub const ALLOC_GRANULARITY: usize = 4;

const _: () = assert!(ALLOC_GRANULARITY * ElemKind::MIN_SIZE % ElemKind::MAX_SIZE == 0);

/// Discriminant of the supported element types.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum ElemKind {
    F32,
    F64,
    I32,
    U16,
}

impl ElemKind {
    pub(crate) const MIN_SIZE: usize = 2;
    pub(crate) const MAX_SIZE: usize = 8;

    /// Size of one element in bytes.
    #[inline]
    pub const fn size_of(self) -> usize {
        match self {
            ElemKind::F32 => 4,
            ElemKind::F64 => 8,
            ElemKind::I32 => 4,
            ElemKind::U16 => 2,
        }
    }

    /// Human-readable type name for error messages.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            ElemKind::F32 => "f32",
            ElemKind::F64 => "f64",
            ElemKind::I32 => "i32",
            ElemKind::U16 => "u16",
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Element types a halo message may carry.
///
/// Sealed: the scratch pool reinterprets raw bytes across these types, so the
/// set is fixed together with [`ALLOC_GRANULARITY`].
pub trait HaloElem:
    bytemuck::Pod + Send + Sync + sealed::Sealed + PartialEq + std::fmt::Debug + 'static
{
    /// Discriminant of `Self`.
    const KIND: ElemKind;

    #[doc(hidden)]
    fn field_mut<'s, 'a>(any: &'s mut AnyField<'a>) -> Option<&'s mut Field<'a, Self>>;
}

macro_rules! impl_halo_elem {
    ($($ty:ty => $kind:ident),* $(,)?) => {$(
        impl sealed::Sealed for $ty {}
        impl HaloElem for $ty {
            const KIND: ElemKind = ElemKind::$kind;
            fn field_mut<'s, 'a>(
                any: &'s mut AnyField<'a>,
            ) -> Option<&'s mut Field<'a, Self>> {
                match any {
                    AnyField::$kind(f) => Some(f),
                    _ => None,
                }
            }
        }
    )*};
}

impl_halo_elem!(f32 => F32, f64 => F64, i32 => I32, u16 => U16);

const _: () = {
    assert!(std::mem::size_of::<u16>() == ElemKind::MIN_SIZE);
    assert!(std::mem::size_of::<f64>() == ElemKind::MAX_SIZE);
};

/// Where a field's storage lives.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Residency {
    Host,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "wgpu")]
    Wgpu,
}

enum FieldData<'a, T: HaloElem> {
    Host(&'a mut [T]),
    #[cfg(feature = "cuda")]
    Cuda(&'a mut crate::gpu::cuda::CudaField<T>),
    #[cfg(feature = "wgpu")]
    Wgpu(&'a mut crate::gpu::wgpu::WgpuField<T>),
}

/// A borrowed dense array taking part in a halo update.
pub struct Field<'a, T: HaloElem> {
    data: FieldData<'a, T>,
    size: [usize; NDIMS],
    ndims: usize,
}

impl<'a, T: HaloElem> std::fmt::Debug for Field<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("size", &self.size)
            .field("ndims", &self.ndims)
            .finish()
    }
}

impl<'a, T: HaloElem> Field<'a, T> {
    fn with_shape(data: FieldData<'a, T>, len: usize, shape: &[usize]) -> Result<Self, HaloError> {
        if shape.is_empty() || shape.len() > NDIMS {
            return Err(HaloError::UnsupportedRank { ndims: shape.len() });
        }
        let mut size = [1usize; NDIMS];
        size[..shape.len()].copy_from_slice(shape);
        if size.iter().product::<usize>() != len {
            return Err(HaloError::ShapeMismatch {
                nx: size[0],
                ny: size[1],
                nz: size[2],
                len,
            });
        }
        Ok(Self {
            data,
            size,
            ndims: shape.len(),
        })
    }

    /// Borrow a host-resident array of the given shape (1 to 3 extents,
    /// axis 0 fastest).
    pub fn from_host(data: &'a mut [T], shape: &[usize]) -> Result<Self, HaloError> {
        let len = data.len();
        Self::with_shape(FieldData::Host(data), len, shape)
    }

    /// Borrow a CUDA-resident array.
    #[cfg(feature = "cuda")]
    pub fn from_cuda(dev: &'a mut crate::gpu::cuda::CudaField<T>) -> Result<Self, HaloError> {
        let len = dev.len();
        let shape = dev.shape().to_vec();
        Self::with_shape(FieldData::Cuda(dev), len, &shape)
    }

    /// Borrow a wgpu-resident array.
    #[cfg(feature = "wgpu")]
    pub fn from_wgpu(dev: &'a mut crate::gpu::wgpu::WgpuField<T>) -> Result<Self, HaloError> {
        let len = dev.len();
        let shape = dev.shape().to_vec();
        Self::with_shape(FieldData::Wgpu(dev), len, &shape)
    }

    /// Extent along `dim` (1 for padded axes).
    #[inline]
    pub fn size(&self, dim: usize) -> usize {
        self.size[dim]
    }

    /// All three (padded) extents.
    #[inline]
    pub fn extents(&self) -> [usize; NDIMS] {
        self.size
    }

    /// Rank as constructed (before padding).
    #[inline]
    pub fn ndims(&self) -> usize {
        self.ndims
    }

    /// Total element count.
    #[inline]
    pub fn len(&self) -> usize {
        self.size.iter().product()
    }

    /// Whether the field holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Storage location of the field.
    pub fn residency(&self) -> Residency {
        match &self.data {
            FieldData::Host(_) => Residency::Host,
            #[cfg(feature = "cuda")]
            FieldData::Cuda(_) => Residency::Cuda,
            #[cfg(feature = "wgpu")]
            FieldData::Wgpu(_) => Residency::Wgpu,
        }
    }

    /// Address of the underlying storage, used only for aliasing checks.
    pub(crate) fn addr(&self) -> usize {
        match &self.data {
            FieldData::Host(s) => s.as_ptr() as usize,
            #[cfg(feature = "cuda")]
            FieldData::Cuda(d) => d.device_addr(),
            #[cfg(feature = "wgpu")]
            FieldData::Wgpu(d) => d.buffer_addr(),
        }
    }

    /// Host view, if host-resident.
    pub(crate) fn host(&self) -> Option<&[T]> {
        match &self.data {
            FieldData::Host(s) => Some(s),
            #[cfg(any(feature = "cuda", feature = "wgpu"))]
            _ => None,
        }
    }

    /// Mutable host view, if host-resident.
    pub(crate) fn host_mut(&mut self) -> Option<&mut [T]> {
        match &mut self.data {
            FieldData::Host(s) => Some(s),
            #[cfg(any(feature = "cuda", feature = "wgpu"))]
            _ => None,
        }
    }

    /// CUDA view, if CUDA-resident.
    #[cfg(feature = "cuda")]
    pub(crate) fn cuda(&self) -> Option<&crate::gpu::cuda::CudaField<T>> {
        match &self.data {
            FieldData::Cuda(d) => Some(d),
            _ => None,
        }
    }

    /// Mutable CUDA view, if CUDA-resident.
    #[cfg(feature = "cuda")]
    pub(crate) fn cuda_mut(&mut self) -> Option<&mut crate::gpu::cuda::CudaField<T>> {
        match &mut self.data {
            FieldData::Cuda(d) => Some(d),
            _ => None,
        }
    }

    /// wgpu view, if wgpu-resident.
    #[cfg(feature = "wgpu")]
    pub(crate) fn wgpu(&self) -> Option<&crate::gpu::wgpu::WgpuField<T>> {
        match &self.data {
            FieldData::Wgpu(d) => Some(d),
            _ => None,
        }
    }

    /// Mutable wgpu view, if wgpu-resident.
    #[cfg(feature = "wgpu")]
    pub(crate) fn wgpu_mut(&mut self) -> Option<&mut crate::gpu::wgpu::WgpuField<T>> {
        match &mut self.data {
            FieldData::Wgpu(d) => Some(d),
            _ => None,
        }
    }
}

/// A field of any supported element type.
///
/// `update_halo` takes a slice of these so that element-type homogeneity is a
/// run-time precondition with a useful error, rather than a compile-time
/// restriction on the call site.
pub enum AnyField<'a> {
    F32(Field<'a, f32>),
    F64(Field<'a, f64>),
    I32(Field<'a, i32>),
    U16(Field<'a, u16>),
}

macro_rules! any_dispatch {
    ($self:expr, $f:ident => $body:expr) => {
        match $self {
            AnyField::F32($f) => $body,
            AnyField::F64($f) => $body,
            AnyField::I32($f) => $body,
            AnyField::U16($f) => $body,
        }
    };
}

impl<'a> AnyField<'a> {
    /// Element-type discriminant.
    pub fn kind(&self) -> ElemKind {
        match self {
            AnyField::F32(_) => ElemKind::F32,
            AnyField::F64(_) => ElemKind::F64,
            AnyField::I32(_) => ElemKind::I32,
            AnyField::U16(_) => ElemKind::U16,
        }
    }

    /// Padded extents.
    pub fn extents(&self) -> [usize; NDIMS] {
        any_dispatch!(self, f => f.extents())
    }

    /// Rank as constructed.
    pub fn ndims(&self) -> usize {
        any_dispatch!(self, f => f.ndims())
    }

    pub(crate) fn addr(&self) -> usize {
        any_dispatch!(self, f => f.addr())
    }
}

macro_rules! impl_any_from {
    ($($kind:ident => $ty:ty),* $(,)?) => {$(
        impl<'a> From<Field<'a, $ty>> for AnyField<'a> {
            fn from(f: Field<'a, $ty>) -> Self {
                AnyField::$kind(f)
            }
        }
    )*};
}

impl_any_from!(F32 => f32, F64 => f64, I32 => i32, U16 => u16);

/// Cardinality of the halo plane orthogonal to `dim`: the product of the
/// other two (padded) extents.
#[inline]
pub fn halo_size(dim: usize, size: [usize; NDIMS]) -> usize {
    let mut n = 1;
    for (k, &s) in size.iter().enumerate() {
        if k != dim {
            n *= s;
        }
    }
    n
}

/// Largest halo plane any dimension of a field can produce: the product of
/// all unpadded extents except the smallest. 1 for rank-1 fields.
pub fn max_halo_elems(size: [usize; NDIMS], ndims: usize) -> usize {
    let mut ext: Vec<usize> = size[..ndims].to_vec();
    ext.sort_unstable();
    ext[1..].iter().product()
}

/// Index ranges of the plane sent to the neighbour on `side` along `dim`:
/// the interior row adjacent to the halo, full extent on the other axes.
pub fn send_ranges(
    side: Side,
    dim: usize,
    ol: usize,
    size: [usize; NDIMS],
) -> [Range<usize>; NDIMS] {
    let along = match side {
        Side::Low => (ol - 1)..ol,
        Side::High => (size[dim] - ol)..(size[dim] - ol + 1),
    };
    plane_ranges(dim, along, size)
}

/// Index ranges of the halo row overwritten by data from `side` along `dim`.
pub fn recv_ranges(side: Side, dim: usize, size: [usize; NDIMS]) -> [Range<usize>; NDIMS] {
    let along = match side {
        Side::Low => 0..1,
        Side::High => (size[dim] - 1)..size[dim],
    };
    plane_ranges(dim, along, size)
}

fn plane_ranges(
    dim: usize,
    along: Range<usize>,
    size: [usize; NDIMS],
) -> [Range<usize>; NDIMS] {
    let mut r = [0..size[0], 0..size[1], 0..size[2]];
    r[dim] = along;
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_must_cover_buffer() {
        let mut buf = vec![0.0f64; 24];
        assert!(Field::from_host(&mut buf, &[4, 6]).is_ok());
        let err = Field::from_host(&mut buf, &[4, 7]).unwrap_err();
        assert!(matches!(err, HaloError::ShapeMismatch { .. }));
    }

    #[test]
    fn rank_bounds() {
        let mut buf = vec![0.0f32; 8];
        assert!(matches!(
            Field::from_host(&mut buf, &[]).unwrap_err(),
            HaloError::UnsupportedRank { ndims: 0 }
        ));
        assert!(matches!(
            Field::from_host(&mut buf, &[2, 2, 2, 1]).unwrap_err(),
            HaloError::UnsupportedRank { ndims: 4 }
        ));
    }

    #[test]
    fn padded_extents() {
        let mut buf = vec![0i32; 10];
        let f = Field::from_host(&mut buf, &[10]).unwrap();
        assert_eq!(f.extents(), [10, 1, 1]);
        assert_eq!(f.ndims(), 1);
        assert_eq!(f.len(), 10);
    }

    #[test]
    fn halo_size_is_cross_section() {
        assert_eq!(halo_size(0, [4, 6, 8]), 48);
        assert_eq!(halo_size(1, [4, 6, 8]), 32);
        assert_eq!(halo_size(2, [4, 6, 8]), 24);
        assert_eq!(halo_size(0, [10, 1, 1]), 1);
    }

    #[test]
    fn max_halo_elems_drops_smallest_axis() {
        assert_eq!(max_halo_elems([4, 6, 8], 3), 48);
        assert_eq!(max_halo_elems([8, 6, 4], 3), 48);
        assert_eq!(max_halo_elems([6, 4, 1], 2), 6);
        assert_eq!(max_halo_elems([10, 1, 1], 1), 1);
    }

    #[test]
    fn send_ranges_pick_interior_rows() {
        let size = [10, 1, 1];
        let lo = send_ranges(Side::Low, 0, 2, size);
        assert_eq!(lo[0], 1..2);
        let hi = send_ranges(Side::High, 0, 2, size);
        assert_eq!(hi[0], 8..9);
        assert_eq!(lo[1], 0..1);
    }

    #[test]
    fn recv_ranges_pick_halo_rows() {
        let size = [10, 4, 1];
        assert_eq!(recv_ranges(Side::Low, 0, size)[0], 0..1);
        assert_eq!(recv_ranges(Side::High, 0, size)[0], 9..10);
        assert_eq!(recv_ranges(Side::High, 1, size)[1], 3..4);
        assert_eq!(recv_ranges(Side::High, 1, size)[0], 0..10);
    }

    #[test]
    fn any_field_reports_kind_and_shape() {
        let mut a = vec![0.0f32; 6];
        let any: AnyField = Field::from_host(&mut a, &[3, 2]).unwrap().into();
        assert_eq!(any.kind(), ElemKind::F32);
        assert_eq!(any.extents(), [3, 2, 1]);
        assert_eq!(any.ndims(), 2);
    }
}
