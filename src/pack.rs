//! Host pack/unpack engine.
//!
//! Copies one strided boundary plane of a field into a contiguous buffer and
//! back. The exchanged dimension is the singleton axis; the plane is laid out
//! row-major over the remaining axes in axis order. Each direction has three
//! axis-specialized fast cases (the non-singleton axes spanning the full
//! extent) plus a strided general fallback.
//!
//! Contiguous runs at or above the thread-copy threshold are split across
//! the rayon pool when the `rayon` feature is enabled; below it a plain
//! slice copy is used, which the compiler vectorizes.

use std::ops::Range;

use crate::field::HaloElem;
use crate::topology::NDIMS;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Contiguous copies of at least this many elements go through the thread
/// pool.
pub const THREADCOPY_THRESHOLD: usize = 32768;

#[inline]
fn is_full(r: &Range<usize>, extent: usize) -> bool {
    r.start == 0 && r.end == extent
}

#[inline]
fn plane_len(ranges: &[Range<usize>; NDIMS]) -> usize {
    ranges.iter().map(|r| r.len()).product()
}

/// Copy between two equal-length contiguous slices, threading above the
/// threshold.
pub fn copy_contiguous<T: HaloElem>(src: &[T], dst: &mut [T], threshold: usize) {
    debug_assert_eq!(src.len(), dst.len());
    #[cfg(feature = "rayon")]
    if src.len() >= threshold.max(1) {
        let chunk = (src.len() / rayon::current_num_threads().max(1)).max(1024);
        dst.par_chunks_mut(chunk)
            .zip(src.par_chunks(chunk))
            .for_each(|(d, s)| d.copy_from_slice(s));
        return;
    }
    let _ = threshold;
    dst.copy_from_slice(src);
}

/// Pack the plane described by `ranges` (singleton along `dim`) from a field
/// of extents `size` into the contiguous `dst`.
pub fn pack_plane<T: HaloElem>(
    dim: usize,
    src: &[T],
    size: [usize; NDIMS],
    ranges: &[Range<usize>; NDIMS],
    dst: &mut [T],
    threshold: usize,
) {
    let total = plane_len(ranges);
    debug_assert_eq!(dst.len(), total);
    debug_assert_eq!(ranges[dim].len(), 1);
    let [nx, ny, _nz] = size;
    match dim {
        2 if is_full(&ranges[0], nx) && is_full(&ranges[1], ny) => {
            let off = nx * ny * ranges[2].start;
            copy_contiguous(&src[off..off + total], dst, threshold);
        }
        1 if is_full(&ranges[0], nx) => {
            let y0 = ranges[1].start;
            let rows = |row: &mut [T], iz: usize| {
                let off = nx * (y0 + ny * iz);
                row.copy_from_slice(&src[off..off + nx]);
            };
            #[cfg(feature = "rayon")]
            if total >= threshold.max(1) {
                dst.par_chunks_mut(nx)
                    .zip(ranges[2].clone().into_par_iter())
                    .for_each(|(row, iz)| rows(row, iz));
                return;
            }
            for (row, iz) in dst.chunks_mut(nx).zip(ranges[2].clone()) {
                rows(row, iz);
            }
        }
        0 if is_full(&ranges[1], ny) => {
            let x0 = ranges[0].start;
            let gather = |row: &mut [T], iz: usize| {
                for (o, iy) in row.iter_mut().zip(0..ny) {
                    *o = src[x0 + nx * (iy + ny * iz)];
                }
            };
            #[cfg(feature = "rayon")]
            if total >= threshold.max(1) {
                dst.par_chunks_mut(ny)
                    .zip(ranges[2].clone().into_par_iter())
                    .for_each(|(row, iz)| gather(row, iz));
                return;
            }
            for (row, iz) in dst.chunks_mut(ny).zip(ranges[2].clone()) {
                gather(row, iz);
            }
        }
        _ => {
            // General strided fallback: runs of the x-range per (iy, iz).
            let lenx = ranges[0].len();
            let mut out = 0;
            for iz in ranges[2].clone() {
                for iy in ranges[1].clone() {
                    let off = ranges[0].start + nx * (iy + ny * iz);
                    dst[out..out + lenx].copy_from_slice(&src[off..off + lenx]);
                    out += lenx;
                }
            }
        }
    }
}

/// Scatter the contiguous `src` back into the plane described by `ranges`.
pub fn unpack_plane<T: HaloElem>(
    dim: usize,
    src: &[T],
    size: [usize; NDIMS],
    ranges: &[Range<usize>; NDIMS],
    dst: &mut [T],
    threshold: usize,
) {
    let total = plane_len(ranges);
    debug_assert_eq!(src.len(), total);
    debug_assert_eq!(ranges[dim].len(), 1);
    let [nx, ny, _nz] = size;
    match dim {
        2 if is_full(&ranges[0], nx) && is_full(&ranges[1], ny) => {
            let off = nx * ny * ranges[2].start;
            copy_contiguous(src, &mut dst[off..off + total], threshold);
        }
        1 if is_full(&ranges[0], nx) => {
            let y0 = ranges[1].start;
            // Rows land at strided offsets; iterate z serially to keep the
            // destination borrows disjoint without unsafe chunking.
            for (row, iz) in src.chunks(nx).zip(ranges[2].clone()) {
                let off = nx * (y0 + ny * iz);
                dst[off..off + nx].copy_from_slice(row);
            }
        }
        0 if is_full(&ranges[1], ny) => {
            let x0 = ranges[0].start;
            for (row, iz) in src.chunks(ny).zip(ranges[2].clone()) {
                for (&v, iy) in row.iter().zip(0..ny) {
                    dst[x0 + nx * (iy + ny * iz)] = v;
                }
            }
        }
        _ => {
            let lenx = ranges[0].len();
            let mut taken = 0;
            for iz in ranges[2].clone() {
                for iy in ranges[1].clone() {
                    let off = ranges[0].start + nx * (iy + ny * iz);
                    dst[off..off + lenx].copy_from_slice(&src[taken..taken + lenx]);
                    taken += lenx;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{halo_size, recv_ranges, send_ranges};
    use crate::topology::Side;

    fn reference_pack(size: [usize; 3], ranges: &[Range<usize>; 3], src: &[f64]) -> Vec<f64> {
        let mut out = Vec::new();
        for iz in ranges[2].clone() {
            for iy in ranges[1].clone() {
                for ix in ranges[0].clone() {
                    out.push(src[ix + size[0] * (iy + size[1] * iz)]);
                }
            }
        }
        out
    }

    fn numbered(size: [usize; 3]) -> Vec<f64> {
        (0..size.iter().product::<usize>()).map(|i| i as f64).collect()
    }

    #[test]
    fn pack_matches_reference_on_each_dim() {
        let size = [4, 5, 3];
        let src = numbered(size);
        for dim in 0..3 {
            for side in Side::ALL {
                let ranges = send_ranges(side, dim, 2, size);
                let mut dst = vec![0.0; halo_size(dim, size)];
                pack_plane(dim, &src, size, &ranges, &mut dst, THREADCOPY_THRESHOLD);
                assert_eq!(dst, reference_pack(size, &ranges, &src), "dim {dim} {side:?}");
            }
        }
    }

    #[test]
    fn unpack_inverts_pack() {
        let size = [4, 5, 3];
        let src = numbered(size);
        for dim in 0..3 {
            let ranges = recv_ranges(Side::High, dim, size);
            let plane = reference_pack(size, &ranges, &src);
            let mut dst = vec![0.0; src.len()];
            unpack_plane(dim, &plane, size, &ranges, &mut dst, THREADCOPY_THRESHOLD);
            let expect = reference_pack(size, &ranges, &dst);
            assert_eq!(expect, plane, "dim {dim}");
        }
    }

    #[test]
    fn threaded_path_agrees_with_serial() {
        let size = [32, 16, 8];
        let src = numbered(size);
        for dim in 0..3 {
            let ranges = send_ranges(Side::Low, dim, 2, size);
            let mut fast = vec![0.0; halo_size(dim, size)];
            let mut slow = vec![0.0; halo_size(dim, size)];
            pack_plane(dim, &src, size, &ranges, &mut fast, 1);
            pack_plane(dim, &src, size, &ranges, &mut slow, usize::MAX);
            assert_eq!(fast, slow, "dim {dim}");
        }
    }

    #[test]
    fn padded_ranks_behave_as_three_d() {
        let size = [10, 1, 1];
        let src = numbered(size);
        let ranges = send_ranges(Side::High, 0, 2, size);
        let mut dst = vec![0.0; 1];
        pack_plane(0, &src, size, &ranges, &mut dst, THREADCOPY_THRESHOLD);
        assert_eq!(dst, vec![8.0]);
    }

    #[test]
    fn general_fallback_handles_partial_extent() {
        let size = [4, 4, 4];
        let src = numbered(size);
        let ranges = [1..3, 1..3, 2..3];
        let mut dst = vec![0.0; 4];
        pack_plane(2, &src, size, &ranges, &mut dst, THREADCOPY_THRESHOLD);
        assert_eq!(dst, reference_pack(size, &ranges, &src));
        let mut back = vec![0.0; src.len()];
        unpack_plane(2, &dst, size, &ranges, &mut back, THREADCOPY_THRESHOLD);
        assert_eq!(reference_pack(size, &ranges, &back), dst);
    }
}
