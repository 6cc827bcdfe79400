//! Randomized invariants of the single-process periodic exchange.

use grid_halo::prelude::*;
use proptest::prelude::*;

/// Final cell coordinate after one periodic exchange along an axis of extent
/// `n` with overlap `ol`: halo rows mirror the interior rows adjacent to the
/// opposite halo, everything else maps to itself.
fn source_coord(n: usize, ol: usize, i: usize) -> usize {
    if ol < 2 || n == 1 {
        i
    } else if i == 0 {
        n - ol
    } else if i == n - 1 {
        ol - 1
    } else {
        i
    }
}

/// Overlap 2 on the real axes, none on padded ones.
fn overlaps_for(rank: usize) -> [usize; 3] {
    let mut ol = [0usize; 3];
    ol[..rank].fill(2);
    ol
}

fn run_case(shape: Vec<usize>, nfields: usize, seed: u64) {
    let mut size = [1usize; 3];
    size[..shape.len()].copy_from_slice(&shape);
    let total: usize = size.iter().product();
    let topo = CartesianTopology::single([true, true, true], size, overlaps_for(shape.len()));
    let mut ex = HaloExchanger::new(topo, NoComm);

    let mut arrays: Vec<Vec<f64>> = (0..nfields)
        .map(|k| {
            (0..total)
                .map(|l| ((seed as usize + k * 7919 + l * 31) % 100_003) as f64)
                .collect()
        })
        .collect();
    let starts = arrays.clone();

    let mut fields: Vec<AnyField> = arrays
        .iter_mut()
        .map(|a| AnyField::from(Field::from_host(a, &shape).unwrap()))
        .collect();
    ex.update_halo(&mut fields).unwrap();
    drop(fields);

    let ol: Vec<usize> = (0..3)
        .map(|d| ex.topology().overlap_of(d, size[d]))
        .collect();
    for (a, start) in arrays.iter().zip(&starts) {
        for z in 0..size[2] {
            for y in 0..size[1] {
                for x in 0..size[0] {
                    let sx = source_coord(size[0], ol[0], x);
                    let sy = source_coord(size[1], ol[1], y);
                    let sz = source_coord(size[2], ol[2], z);
                    let got = a[x + size[0] * (y + size[1] * z)];
                    let expect = start[sx + size[0] * (sy + size[1] * sz)];
                    assert_eq!(got, expect, "cell ({x},{y},{z}) of {shape:?}");
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn periodic_exchange_matches_wrap_model(
        shape in prop::collection::vec(3usize..9, 1..=3),
        nfields in 1usize..=3,
        seed in any::<u64>(),
    ) {
        run_case(shape, nfields, seed);
    }

    #[test]
    fn exchange_is_idempotent(
        shape in prop::collection::vec(3usize..8, 1..=3),
        seed in any::<u64>(),
    ) {
        let mut size = [1usize; 3];
        size[..shape.len()].copy_from_slice(&shape);
        let total: usize = size.iter().product();
        let topo =
            CartesianTopology::single([true, true, true], size, overlaps_for(shape.len()));
        let mut ex = HaloExchanger::new(topo, NoComm);
        let mut data: Vec<f64> = (0..total).map(|l| ((seed as usize + l) % 997) as f64).collect();

        let mut fields = [AnyField::from(Field::from_host(&mut data, &shape).unwrap())];
        ex.update_halo(&mut fields).unwrap();
        drop(fields);
        let once = data.clone();

        let mut fields = [AnyField::from(Field::from_host(&mut data, &shape).unwrap())];
        ex.update_halo(&mut fields).unwrap();
        drop(fields);
        prop_assert_eq!(data, once);
    }
}
