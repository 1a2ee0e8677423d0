//! Performance benchmarks for memory operations

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use unimem::search::similarity;
use unimem::*;

fn seeded_store(n: usize) -> MemoryStore {
    let store = MemoryStore::open_in_memory().unwrap();
    for i in 0..n {
        let tier = if i % 4 == 0 {
            MemoryTier::Core
        } else {
            MemoryTier::Longterm
        };
        store
            .store(
                StoreMemoryInput::new(
                    format!("Memory content number {} about topic {}", i, i % 17),
                    tier,
                    MemoryScope::Global,
                )
                .with_tags([format!("tag{}", i % 10)]),
            )
            .unwrap();
    }
    store
}

fn bench_memory_store(c: &mut Criterion) {
    let store = MemoryStore::open_in_memory().unwrap();

    let mut group = c.benchmark_group("memory_store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("core_global", |b| {
        b.iter(|| {
            store
                .store(StoreMemoryInput::new(
                    "Test content for benchmarking purposes",
                    MemoryTier::Core,
                    MemoryScope::Global,
                ))
                .unwrap()
        })
    });

    group.finish();
}

fn bench_memory_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_search");

    for size in [100, 1000].iter() {
        let store = seeded_store(*size);
        group.bench_with_input(BenchmarkId::new("store_size", size), size, |b, _| {
            b.iter(|| {
                store
                    .search(black_box("topic 3"), &SearchOptions::default())
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_duplicate_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplicate_check");

    for size in [100, 1000].iter() {
        let store = seeded_store(*size);
        group.bench_with_input(BenchmarkId::new("store_size", size), size, |b, _| {
            b.iter(|| {
                store
                    .check_duplicate(
                        black_box("Memory content number 42 about topic 8"),
                        &DuplicateQuery::default(),
                    )
                    .unwrap()
            })
        });
    }

    group.bench_function("similarity_pair", |b| {
        b.iter(|| {
            similarity(
                black_box("JavaScript async/await patterns for handling promises"),
                black_box("JavaScript async await patterns for promise handling"),
            )
        })
    });

    group.finish();
}

fn bench_analytics(c: &mut Criterion) {
    let store = seeded_store(1000);
    c.bench_function("analytics_1000", |b| b.iter(|| store.get_analytics().unwrap()));
}

criterion_group!(
    benches,
    bench_memory_store,
    bench_memory_search,
    bench_duplicate_check,
    bench_analytics
);
criterion_main!(benches);
