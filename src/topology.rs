//! Cartesian process topology: rank layout, neighbour lookup, and per-field
//! overlap arithmetic.
//!
//! The decomposition is given, not computed: callers construct a
//! [`CartesianTopology`] from the process-grid shape, periodicity, this
//! process's rank, and the base interior extents of the local subdomain.
//! Ranks map to coordinates in the same axis order as field storage
//! (axis 0 varies fastest).

use crate::error::HaloError;

/// Number of spatial dimensions handled by the exchange.
pub const NDIMS: usize = 3;

/// Neighbours per dimension (one low side, one high side).
pub const NNEIGHBORS_PER_DIM: usize = 2;

/// One of the two neighbour sides along a dimension.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Side {
    /// Towards decreasing coordinate.
    Low,
    /// Towards increasing coordinate.
    High,
}

impl Side {
    /// Both sides in low-to-high order.
    pub const ALL: [Side; NNEIGHBORS_PER_DIM] = [Side::Low, Side::High];

    /// Both sides in high-to-low order (receive posting order).
    pub const REVERSED: [Side; NNEIGHBORS_PER_DIM] = [Side::High, Side::Low];

    /// Table index of this side.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Side::Low => 0,
            Side::High => 1,
        }
    }

    /// The paired side, `OPPOSITE(n) = NNEIGHBORS_PER_DIM - n + 1` in
    /// 1-based neighbour numbering.
    #[inline]
    pub const fn opposite(self) -> Side {
        match self {
            Side::Low => Side::High,
            Side::High => Side::Low,
        }
    }
}

/// How a dimension participates in the exchange.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DimKind {
    /// Both neighbours are this process (periodic wrap on a single process):
    /// the exchange is an in-process buffer copy.
    Local,
    /// Every existing neighbour is another process; absent neighbours simply
    /// contribute no traffic.
    Remote,
}

/// Cartesian process decomposition of an implicit global grid.
///
/// Holds the process-grid shape and this process's place in it, plus the base
/// interior extents `nxyz` and per-dimension overlaps from which the halo
/// thickness of any co-located field follows.
#[derive(Clone, Debug)]
pub struct CartesianTopology {
    dims: [usize; NDIMS],
    periods: [bool; NDIMS],
    coords: [usize; NDIMS],
    rank: usize,
    nprocs: usize,
    nxyz: [usize; NDIMS],
    overlaps: [usize; NDIMS],
}

impl CartesianTopology {
    /// Build the topology for `rank` inside a `dims` process grid.
    ///
    /// `nxyz` are the base local extents a plain field has on this process;
    /// `overlaps` is the per-dimension overlap of the decomposition. Missing
    /// trailing dimensions of the process grid behave as size 1.
    pub fn new(
        dims: [usize; NDIMS],
        periods: [bool; NDIMS],
        rank: usize,
        nxyz: [usize; NDIMS],
        overlaps: [usize; NDIMS],
    ) -> Result<Self, HaloError> {
        let dims = dims.map(|d| d.max(1));
        let nprocs = dims.iter().product();
        if rank >= nprocs {
            return Err(HaloError::RankOutOfGrid { rank, nprocs });
        }
        let mut coords = [0usize; NDIMS];
        let mut rest = rank;
        for d in 0..NDIMS {
            coords[d] = rest % dims[d];
            rest /= dims[d];
        }
        Ok(Self {
            dims,
            periods,
            coords,
            rank,
            nprocs,
            nxyz,
            overlaps,
        })
    }

    /// A single-process topology, periodic where requested.
    ///
    /// Every periodic dimension wraps onto this process itself, which selects
    /// the local exchange path.
    pub fn single(
        periods: [bool; NDIMS],
        nxyz: [usize; NDIMS],
        overlaps: [usize; NDIMS],
    ) -> Self {
        Self::new([1; NDIMS], periods, 0, nxyz, overlaps)
            .expect("rank 0 always fits a 1x1x1 grid")
    }

    fn rank_of(&self, coords: [usize; NDIMS]) -> usize {
        coords[0] + self.dims[0] * (coords[1] + self.dims[1] * coords[2])
    }

    /// This process's rank.
    #[inline]
    pub fn me(&self) -> usize {
        self.rank
    }

    /// Total number of processes in the grid.
    #[inline]
    pub fn nprocs(&self) -> usize {
        self.nprocs
    }

    /// This process's grid coordinates.
    #[inline]
    pub fn coords(&self) -> [usize; NDIMS] {
        self.coords
    }

    /// Process-grid shape.
    #[inline]
    pub fn dims(&self) -> [usize; NDIMS] {
        self.dims
    }

    /// Base local interior extents.
    #[inline]
    pub fn nxyz(&self) -> [usize; NDIMS] {
        self.nxyz
    }

    /// Rank of the neighbour on `side` along `dim`, or `None` at a
    /// non-periodic boundary.
    pub fn neighbor(&self, side: Side, dim: usize) -> Option<usize> {
        let mut c = self.coords;
        let n = self.dims[dim];
        match side {
            Side::Low => {
                if c[dim] == 0 {
                    if !self.periods[dim] {
                        return None;
                    }
                    c[dim] = n - 1;
                } else {
                    c[dim] -= 1;
                }
            }
            Side::High => {
                if c[dim] + 1 == n {
                    if !self.periods[dim] {
                        return None;
                    }
                    c[dim] = 0;
                } else {
                    c[dim] += 1;
                }
            }
        }
        Some(self.rank_of(c))
    }

    /// Whether a neighbour exists on `side` along `dim`.
    #[inline]
    pub fn has_neighbor(&self, side: Side, dim: usize) -> bool {
        self.neighbor(side, dim).is_some()
    }

    /// Overlap of a field of extent `size` along `dim`.
    ///
    /// A field may be larger than the base grid along a dimension; its
    /// overlap grows by the difference: `size - nxyz + overlaps`.
    pub fn overlap_of(&self, dim: usize, size: usize) -> usize {
        (size + self.overlaps[dim]).saturating_sub(self.nxyz[dim])
    }

    /// Classify `dim` as local (self-neighbour on both sides) or remote.
    ///
    /// A dimension where exactly one side wraps onto this process cannot be
    /// given a consistent exchange order and is rejected.
    pub fn classify(&self, dim: usize) -> Result<DimKind, HaloError> {
        let lo = self.neighbor(Side::Low, dim);
        let hi = self.neighbor(Side::High, dim);
        let me = Some(self.rank);
        if lo == me && hi == me {
            Ok(DimKind::Local)
        } else if lo != me && hi != me {
            Ok(DimKind::Remote)
        } else {
            Err(HaloError::IncoherentNeighbors { dim })
        }
    }
}
