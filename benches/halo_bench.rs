use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use grid_halo::field::{halo_size, send_ranges};
use grid_halo::pack::{pack_plane, THREADCOPY_THRESHOLD};
use grid_halo::prelude::*;

fn bench_pack_plane(c: &mut Criterion) {
    let size = [128usize, 128, 128];
    let mut rng = SmallRng::seed_from_u64(0x9a10);
    let src: Vec<f64> = (0..size.iter().product::<usize>())
        .map(|_| rng.gen())
        .collect();

    let mut group = c.benchmark_group("pack_plane");
    for dim in 0..3 {
        let ranges = send_ranges(Side::Low, dim, 2, size);
        let elems = halo_size(dim, size);
        group.throughput(Throughput::Bytes((elems * 8) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dim), &dim, |b, &dim| {
            let mut dst = vec![0.0f64; elems];
            b.iter(|| {
                pack_plane(dim, &src, size, &ranges, &mut dst, THREADCOPY_THRESHOLD);
            });
        });
    }
    group.finish();
}

fn bench_update_halo(c: &mut Criterion) {
    let n = 64usize;
    let size = [n, n, n];
    let topo = CartesianTopology::single([true, true, true], size, [2, 2, 2]);
    let mut ex = HaloExchanger::new(topo, NoComm);
    let mut rng = SmallRng::seed_from_u64(7);
    let mut data: Vec<f64> = (0..n * n * n).map(|_| rng.gen()).collect();

    c.bench_function("update_halo/periodic_64cubed", |b| {
        b.iter(|| {
            let mut fields =
                [AnyField::from(Field::from_host(&mut data, &[n, n, n]).unwrap())];
            ex.update_halo(&mut fields).unwrap();
        });
    });
}

criterion_group!(benches, bench_pack_plane, bench_update_halo);
criterion_main!(benches);
