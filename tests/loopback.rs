//! Two-rank exchanges over the intra-process loopback communicator.
//!
//! Each simulated rank runs its exchanger on its own thread; tests use
//! distinct base tags so their routes cannot cross.

use std::thread;

use grid_halo::prelude::*;

fn at(nx: usize, x: usize, y: usize) -> usize {
    x + nx * y
}

fn line_topology(rank: usize, periodic: bool, nxyz: [usize; 3]) -> CartesianTopology {
    CartesianTopology::new([2, 1, 1], [periodic, false, false], rank, nxyz, [2, 2, 0]).unwrap()
}

fn options(tag: u16) -> ExchangeOptions {
    ExchangeOptions {
        tag: CommTag::new(tag),
        ..ExchangeOptions::default()
    }
}

#[test]
fn two_ranks_exchange_interior_rows() {
    // Two ranks side by side along x, each owning a 6x4 field with overlap 2.
    // Rank 0 holds 10*i + j (1-based), rank 1 holds 100 + 10*i + j. After the
    // exchange each rank's x-halo mirrors the neighbour's adjacent interior
    // row; outer boundaries are untouched.
    let spawn = |rank: usize| {
        thread::spawn(move || {
            let comm = LoopbackComm::new(rank, 2);
            let topo = line_topology(rank, false, [6, 4, 1]);
            let mut ex = HaloExchanger::with_options(topo, comm, options(0x4100));
            let base = if rank == 0 { 0.0 } else { 100.0 };
            let mut data: Vec<f64> = (0..24)
                .map(|l| base + 10.0 * ((l % 6) + 1) as f64 + ((l / 6) + 1) as f64)
                .collect();
            let mut fields =
                [AnyField::from(Field::from_host(&mut data, &[6, 4]).unwrap())];
            ex.update_halo(&mut fields).unwrap();
            data
        })
    };
    let h0 = spawn(0);
    let h1 = spawn(1);
    let d0 = h0.join().unwrap();
    let d1 = h1.join().unwrap();

    for j in 0..4 {
        // Rank 0's high halo (1-based i = 6) holds rank 1's i = 2 row.
        assert_eq!(d0[at(6, 5, j)], 100.0 + 10.0 * 2.0 + (j + 1) as f64);
        // Rank 1's low halo (1-based i = 1) holds rank 0's i = 5 row.
        assert_eq!(d1[at(6, 0, j)], 10.0 * 5.0 + (j + 1) as f64);
        // Outer boundaries have no neighbour and keep their values.
        assert_eq!(d0[at(6, 0, j)], 10.0 + (j + 1) as f64);
        assert_eq!(d1[at(6, 5, j)], 100.0 + 10.0 * 6.0 + (j + 1) as f64);
    }
}

#[test]
fn periodic_ring_matches_single_process_local_path() {
    // Both ranks of a periodic two-rank ring hold identical data, so each
    // rank must end up exactly like a single periodic process exchanging with
    // itself through the local path.
    let start: Vec<f64> = (0..10).map(|l| (l as f64) * 1.5).collect();

    let single = {
        let topo = CartesianTopology::single([true, false, false], [10, 1, 1], [2, 0, 0]);
        let mut ex = HaloExchanger::new(topo, NoComm);
        let mut data = start.clone();
        let mut fields = [AnyField::from(Field::from_host(&mut data, &[10]).unwrap())];
        ex.update_halo(&mut fields).unwrap();
        data
    };

    let spawn = |rank: usize| {
        let mut data = start.clone();
        thread::spawn(move || {
            let comm = LoopbackComm::new(rank, 2);
            let topo = line_topology(rank, true, [10, 1, 1]);
            let mut ex = HaloExchanger::with_options(topo, comm, options(0x4200));
            let mut fields =
                [AnyField::from(Field::from_host(&mut data, &[10]).unwrap())];
            ex.update_halo(&mut fields).unwrap();
            data
        })
    };
    let h0 = spawn(0);
    let h1 = spawn(1);
    assert_eq!(h0.join().unwrap(), single);
    assert_eq!(h1.join().unwrap(), single);
}

#[test]
fn several_fields_stay_paired_per_rank() {
    // Two fields of different shapes travel in one call; message matching is
    // purely positional (fixed tag), so values must land per field.
    let spawn = |rank: usize| {
        thread::spawn(move || {
            let comm = LoopbackComm::new(rank, 2);
            let topo = line_topology(rank, false, [6, 4, 1]);
            let mut ex = HaloExchanger::with_options(topo, comm, options(0x4300));
            let base = if rank == 0 { 0.0 } else { 1000.0 };
            let mut a: Vec<f32> = (0..24).map(|l| base as f32 + l as f32).collect();
            let mut b: Vec<f32> = (0..18).map(|l| base as f32 + 500.0 + l as f32).collect();
            let mut fields = [
                AnyField::from(Field::from_host(&mut a, &[6, 4]).unwrap()),
                AnyField::from(Field::from_host(&mut b, &[6, 3]).unwrap()),
            ];
            ex.update_halo(&mut fields).unwrap();
            (a, b)
        })
    };
    let h0 = spawn(0);
    let h1 = spawn(1);
    let (a0, b0) = h0.join().unwrap();
    let (a1, b1) = h1.join().unwrap();

    // Send plane of the low-rank side is x = 4 (0-based), of the high-rank
    // side x = 1; halos are x = 5 and x = 0 respectively.
    for j in 0..4 {
        assert_eq!(a0[at(6, 5, j)], 1000.0 + at(6, 1, j) as f32);
        assert_eq!(a1[at(6, 0, j)], 0.0 + at(6, 4, j) as f32);
    }
    for j in 0..3 {
        assert_eq!(b0[at(6, 5, j)], 1500.0 + at(6, 1, j) as f32);
        assert_eq!(b1[at(6, 0, j)], 500.0 + at(6, 4, j) as f32);
    }
}

#[test]
fn u16_planes_travel_bit_exactly() {
    let spawn = |rank: usize| {
        thread::spawn(move || {
            let comm = LoopbackComm::new(rank, 2);
            let topo = line_topology(rank, false, [8, 1, 1]);
            let mut ex = HaloExchanger::with_options(topo, comm, options(0x4400));
            let mut data: Vec<u16> =
                (0..8).map(|l| (rank as u16) << 12 | (l as u16)).collect();
            let mut fields = [AnyField::from(Field::from_host(&mut data, &[8]).unwrap())];
            ex.update_halo(&mut fields).unwrap();
            data
        })
    };
    let h0 = spawn(0);
    let h1 = spawn(1);
    let d0 = h0.join().unwrap();
    let d1 = h1.join().unwrap();
    assert_eq!(d0[7], 1 << 12 | 1);
    assert_eq!(d1[0], 6);
}
