//! Persistent scratch pool for halo planes.
//!
//! One send slot and one recv slot exist per (field ordinal, neighbour side).
//! Storage is type-erased: each slot owns `u64`-backed bytes (8-byte aligned,
//! so a view at any supported element type is aligned) and is reinterpreted
//! in place when a call switches element type. Capacity is quantized to
//! [`ALLOC_GRANULARITY`] elements and never shrinks, so two calls with equal
//! shapes perform zero allocations.

use crate::error::HaloError;
use crate::field::{max_halo_elems, ElemKind, HaloElem, ALLOC_GRANULARITY};
use crate::topology::{Side, NDIMS, NNEIGHBORS_PER_DIM};

/// Round an element count up to the allocation granularity.
#[inline]
fn quantize(elems: usize) -> usize {
    elems.div_ceil(ALLOC_GRANULARITY) * ALLOC_GRANULARITY
}

/// One contiguous scratch region, viewable at any supported element type.
#[derive(Default)]
pub struct BufSlot {
    words: Vec<u64>,
    kind: Option<ElemKind>,
}

impl BufSlot {
    /// Allocated capacity in bytes.
    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.words.len() * 8
    }

    /// Element kind of the most recent use.
    #[inline]
    pub fn kind(&self) -> Option<ElemKind> {
        self.kind
    }

    /// Ensure capacity for `elems` elements of `T`, reinterpreting in place
    /// when the kind changes. Returns whether an existing allocation grew.
    ///
    /// On allocation failure the slot is left untouched so the call can be
    /// retried.
    fn ensure<T: HaloElem>(&mut self, elems: usize) -> Result<bool, HaloError> {
        let bytes = quantize(elems) * std::mem::size_of::<T>();
        if bytes <= self.capacity_bytes() {
            self.kind = Some(T::KIND);
            return Ok(false);
        }
        let regrown = !self.words.is_empty();
        let words = bytes.div_ceil(8);
        let additional = words - self.words.len();
        self.words
            .try_reserve_exact(additional)
            .map_err(|_| HaloError::AllocationFailed { bytes })?;
        self.words.resize(words, 0);
        self.kind = Some(T::KIND);
        Ok(regrown)
    }

    /// View the first `elems` elements as `T`.
    pub fn view<T: HaloElem>(&self, elems: usize) -> &[T] {
        &bytemuck::cast_slice(&self.words)[..elems]
    }

    /// Mutable view of the first `elems` elements as `T`.
    pub fn view_mut<T: HaloElem>(&mut self, elems: usize) -> &mut [T] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..elems]
    }

    /// View the first `nbytes` bytes.
    pub fn bytes(&self, nbytes: usize) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..nbytes]
    }

    /// Mutable view of the first `nbytes` bytes.
    pub fn bytes_mut(&mut self, nbytes: usize) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..nbytes]
    }

    /// Base address of the slot storage (stable until the next grow).
    pub fn base_addr(&self) -> usize {
        self.words.as_ptr() as usize
    }
}

/// Per-field, per-side send and recv scratch, persisted across calls.
///
/// Indexed by field ordinal within the most recent call; slots beyond the
/// current field count are retained but inert.
#[derive(Default)]
pub struct BufferPool {
    send: Vec<[BufSlot; NNEIGHBORS_PER_DIM]>,
    recv: Vec<[BufSlot; NNEIGHBORS_PER_DIM]>,
    grow_count: u64,
    realloc_count: u64,
}

impl BufferPool {
    /// Ensure send and recv slots exist for every field, sized for the
    /// largest halo plane any of its dimensions can produce.
    pub fn ensure_fields<T: HaloElem>(
        &mut self,
        shapes: &[([usize; NDIMS], usize)],
    ) -> Result<(), HaloError> {
        while self.send.len() < shapes.len() {
            self.send.push(Default::default());
            self.recv.push(Default::default());
        }
        for (i, &(size, ndims)) in shapes.iter().enumerate() {
            let elems = max_halo_elems(size, ndims);
            for side in Side::ALL {
                let n = side.index();
                for slot in [&mut self.send[i][n], &mut self.recv[i][n]] {
                    let had = slot.capacity_bytes();
                    if slot.ensure::<T>(elems)? {
                        self.realloc_count += 1;
                    }
                    if slot.capacity_bytes() != had {
                        self.grow_count += 1;
                        log::debug!(
                            "halo scratch slot (field {i}, {side:?}) grew to {} bytes",
                            slot.capacity_bytes()
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of fields the pool currently covers.
    pub fn field_capacity(&self) -> usize {
        self.send.len()
    }

    /// Send slot for (field `i`, `side`).
    pub fn send_slot(&self, side: Side, i: usize) -> &BufSlot {
        &self.send[i][side.index()]
    }

    /// Mutable send slot for (field `i`, `side`).
    pub fn send_slot_mut(&mut self, side: Side, i: usize) -> &mut BufSlot {
        &mut self.send[i][side.index()]
    }

    /// Recv slot for (field `i`, `side`).
    pub fn recv_slot(&self, side: Side, i: usize) -> &BufSlot {
        &self.recv[i][side.index()]
    }

    /// Mutable recv slot for (field `i`, `side`).
    pub fn recv_slot_mut(&mut self, side: Side, i: usize) -> &mut BufSlot {
        &mut self.recv[i][side.index()]
    }

    /// In-process copy of `nbytes` from send slot (`from`) into the recv slot
    /// of the opposite side, for self-neighbour dimensions.
    pub fn copy_send_to_opposite_recv(&mut self, from: Side, i: usize, nbytes: usize) {
        let to = from.opposite();
        let (src, dst) = (&self.send[i][from.index()], &mut self.recv[i][to.index()]);
        dst.bytes_mut(nbytes).copy_from_slice(src.bytes(nbytes));
    }

    /// Allocations that replaced an existing slot's storage.
    pub fn realloc_count(&self) -> u64 {
        self.realloc_count
    }

    /// Allocations overall, first-time and regrow alike.
    pub fn grow_count(&self) -> u64 {
        self.grow_count
    }

    /// Drop all slots and reset counters.
    pub fn free(&mut self) {
        self.send.clear();
        self.recv.clear();
        self.grow_count = 0;
        self.realloc_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shapes(list: &[[usize; NDIMS]]) -> Vec<([usize; NDIMS], usize)> {
        list.iter().map(|&s| (s, 3)).collect()
    }

    #[test]
    fn capacity_is_quantized() {
        let mut pool = BufferPool::default();
        pool.ensure_fields::<f32>(&[([5, 3, 3], 3)]).unwrap();
        // max halo plane 5*3 = 15 -> 16 elements of f32
        assert_eq!(pool.send_slot(Side::Low, 0).capacity_bytes(), 64);
    }

    #[test]
    fn repeat_call_allocates_nothing() {
        let mut pool = BufferPool::default();
        pool.ensure_fields::<f64>(&shapes(&[[8, 8, 8], [8, 8, 4]]))
            .unwrap();
        let grown = pool.grow_count();
        pool.ensure_fields::<f64>(&shapes(&[[8, 8, 8], [8, 8, 4]]))
            .unwrap();
        assert_eq!(pool.grow_count(), grown);
        assert_eq!(pool.realloc_count(), 0);
    }

    #[test]
    fn widening_keeps_existing_slots() {
        let mut pool = BufferPool::default();
        pool.ensure_fields::<f32>(&shapes(&[[8, 8, 8]])).unwrap();
        let addr = pool.send_slot(Side::Low, 0).base_addr();
        pool.ensure_fields::<f32>(&shapes(&[[8, 8, 8], [8, 8, 8]]))
            .unwrap();
        assert_eq!(pool.send_slot(Side::Low, 0).base_addr(), addr);
        assert_eq!(pool.field_capacity(), 2);
    }

    #[test]
    fn larger_kind_reallocates_smaller_does_not() {
        let mut pool = BufferPool::default();
        pool.ensure_fields::<f32>(&shapes(&[[8, 8, 8]])).unwrap();
        assert_eq!(pool.realloc_count(), 0);
        pool.ensure_fields::<f64>(&shapes(&[[8, 8, 8]])).unwrap();
        assert_eq!(pool.realloc_count(), 4); // send+recv on both sides
        let count = pool.realloc_count();
        pool.ensure_fields::<f32>(&shapes(&[[8, 8, 8]])).unwrap();
        assert_eq!(pool.realloc_count(), count);
        assert_eq!(pool.send_slot(Side::Low, 0).kind(), Some(ElemKind::F32));
    }

    #[test]
    fn reinterpretation_preserves_bytes() {
        let mut pool = BufferPool::default();
        pool.ensure_fields::<f32>(&shapes(&[[4, 1, 1]])).unwrap();
        pool.send_slot_mut(Side::Low, 0)
            .view_mut::<f32>(4)
            .copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let words: Vec<u16> = pool.send_slot(Side::Low, 0).view::<u16>(8).to_vec();
        let back: &[f32] = bytemuck::cast_slice(&words);
        assert_eq!(back, &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn local_copy_lands_in_opposite_recv() {
        let mut pool = BufferPool::default();
        pool.ensure_fields::<i32>(&shapes(&[[4, 4, 1]])).unwrap();
        pool.send_slot_mut(Side::Low, 0)
            .view_mut::<i32>(4)
            .copy_from_slice(&[7, 8, 9, 10]);
        pool.copy_send_to_opposite_recv(Side::Low, 0, 16);
        assert_eq!(pool.recv_slot(Side::High, 0).view::<i32>(4), &[7, 8, 9, 10]);
        assert_eq!(pool.recv_slot(Side::Low, 0).view::<i32>(4), &[0; 4]);
    }

    #[test]
    fn free_resets_everything() {
        let mut pool = BufferPool::default();
        pool.ensure_fields::<f32>(&shapes(&[[8, 8, 8]])).unwrap();
        pool.free();
        assert_eq!(pool.field_capacity(), 0);
        assert_eq!(pool.grow_count(), 0);
    }
}
