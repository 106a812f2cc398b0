// Criterion benchmarks for solfleet-core
//
// Run benchmarks with:
//   cargo bench -p solfleet-core

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use solfleet_core::{BalancedItem, CapacityConfig, ErrorClass, ErrorHandler, LoadBalancer};

fn balancer(n: usize) -> LoadBalancer<String> {
    let items = (0..n)
        .map(|i| {
            BalancedItem::new(
                format!("backend-{i}"),
                CapacityConfig::per_second(50.0),
                ErrorHandler::default(),
            )
        })
        .collect();
    LoadBalancer::new(items)
}

fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort");

    for n in [2usize, 8, 32].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            let lb = balancer(n);
            // mixed samples so the ordering actually has work to do
            for (i, item) in lb.items().iter().enumerate() {
                item.sample(Duration::from_millis(10 + (i as u64 * 7) % 50));
                if i % 3 == 0 {
                    item.on_error(1, ErrorClass::Transient);
                }
            }
            b.iter(|| black_box(&lb).sort());
        });
    }

    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");

    let lb = balancer(8);
    group.bench_function("with_context", |b| {
        b.iter(|| black_box(&lb).with_context());
    });
    group.bench_function("peek", |b| {
        b.iter(|| black_box(&lb).peek());
    });

    group.finish();
}

fn bench_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("capacity");

    let lb = balancer(1);
    let item = lb.with_context();
    let ctx = solfleet_core::CallContext::default();
    group.bench_function("try_claim", |b| {
        b.iter(|| item.capacity().try_claim(black_box(&ctx), 1));
    });
    group.bench_function("duration_until", |b| {
        b.iter(|| item.capacity().duration_until(black_box(&ctx), 1));
    });

    group.finish();
}

criterion_group!(benches, bench_sort, bench_selection, bench_capacity);
criterion_main!(benches);
