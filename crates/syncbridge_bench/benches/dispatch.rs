//! End-to-end dispatch benchmarks against the in-memory remote.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use syncbridge_bench::product;
use syncbridge_core::JobAction;
use syncbridge_engine::EngineConfig;
use syncbridge_testkit::{catalog_module, orders_module, Harness, CATALOG, ORDERS};

/// Benchmark draining a backlog of product creates.
fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_creates");

    for backlog in [10usize, 100] {
        group.throughput(Throughput::Elements(backlog as u64));
        group.bench_with_input(BenchmarkId::from_parameter(backlog), &backlog, |b, &backlog| {
            b.iter_batched(
                || {
                    let h = Harness::builder()
                        .module(catalog_module())
                        .config(EngineConfig::default().with_batch_size(50))
                        .build();
                    for id in 1..=backlog {
                        h.seed_local("product", id as i64, product(id));
                        h.push(CATALOG, "product", JobAction::Create, id as i64);
                    }
                    h
                },
                |h| black_box(h.drain()),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark orders whose products are pushed inline as dependencies.
fn bench_dependencies(c: &mut Criterion) {
    c.bench_function("drain_orders_with_dependencies", |b| {
        b.iter_batched(
            || {
                let h = Harness::builder()
                    .module(catalog_module())
                    .module(orders_module())
                    .build();
                for id in 1..=20i64 {
                    h.seed_local("product", id, product(id as usize));
                    h.seed_local(
                        "order",
                        id,
                        serde_json::json!({ "name": format!("SO{:03}", id), "product_id": id }),
                    );
                    h.push(ORDERS, "order", JobAction::Create, id);
                }
                h
            },
            |h| black_box(h.drain()),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_drain, bench_dependencies);
criterion_main!(benches);
