//! Entity map benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use syncbridge_bench::Stores;

/// Benchmark saving fresh links.
fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_save");
    group.throughput(Throughput::Elements(1));

    for (backend, open) in Stores::all() {
        group.bench_function(BenchmarkId::from_parameter(backend), |b| {
            let stores = open();
            let mut id = 0i64;
            b.iter(|| {
                id += 1;
                stores
                    .map
                    .save("bench", "record", id, id + 1_000_000, "bench.record")
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark lookups in both directions over a populated map.
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_lookup");

    for (backend, open) in Stores::all() {
        let stores = open();
        for id in 1..=10_000i64 {
            stores
                .map
                .save("bench", "record", id, id + 1_000_000, "bench.record")
                .unwrap();
        }

        group.bench_function(BenchmarkId::new("by_local", backend), |b| {
            let mut id = 0i64;
            b.iter(|| {
                id = id % 10_000 + 1;
                black_box(stores.map.get_remote_id("bench", "record", id).unwrap());
            });
        });
        group.bench_function(BenchmarkId::new("by_remote", backend), |b| {
            let mut id = 0i64;
            b.iter(|| {
                id = id % 10_000 + 1;
                black_box(stores.map.get_local_id("bench", "record", id + 1_000_000).unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_save, bench_lookup);
criterion_main!(benches);
