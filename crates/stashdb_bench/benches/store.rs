//! Store facade benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stashdb_bench::utils::{random_ids, record, records, runtime};
use stashdb_core::{SchemaDescriptor, Store};
use stashdb_engine::MemoryEngine;
use std::sync::Arc;

fn new_store() -> Store {
    Store::new(Arc::new(MemoryEngine::new()), SchemaDescriptor::default())
}

/// Benchmark single-record puts, one atomic unit each.
fn bench_put(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("store_put");

    for size in [64, 1024].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let store = new_store();
            let mut id = 0i64;
            b.iter(|| {
                id += 1;
                let key = rt.block_on(store.put(record(id, size))).unwrap();
                black_box(key);
            });
        });
    }

    group.finish();
}

/// Benchmark batched inserts through one unit per batch.
fn bench_add_all(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("store_add_all");
    group.sample_size(30);

    for count in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = new_store();
            let mut start = 0i64;
            b.iter(|| {
                let batch = records(start, count, 64);
                start += count as i64;
                rt.block_on(store.add_all(batch)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark point reads against a populated partition.
fn bench_get(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("store_get");

    for count in [1_000usize, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = new_store();
            rt.block_on(store.add_all(records(0, count, 64))).unwrap();
            let ids = random_ids(1024, count as i64);
            let mut next = 0;

            b.iter(|| {
                let id = ids[next % ids.len()];
                next += 1;
                let found = rt.block_on(store.get(id)).unwrap();
                black_box(found);
            });
        });
    }

    group.finish();
}

/// Benchmark full scans.
fn bench_get_all(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("store_get_all");
    group.sample_size(30);

    for count in [100usize, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = new_store();
            rt.block_on(store.add_all(records(0, count, 64))).unwrap();

            b.iter(|| {
                let all = rt.block_on(store.get_all()).unwrap();
                black_box(all);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_put, bench_add_all, bench_get, bench_get_all);
criterion_main!(benches);
