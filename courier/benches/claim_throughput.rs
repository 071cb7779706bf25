//! Benchmarks for record store claims using criterion.
//!
//! - Seed and drain with the in-memory store
//! - Seed and drain with SQLite (in-memory database)
//! - Retry bookkeeping on a single row

#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use courier::*;
use courier_testkit::{seed_photos, InMemoryRecordStore};
use tokio::runtime::Runtime;

fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

async fn drain(store: &dyn RecordStore, batch_size: usize) -> usize {
    let mut claimed = 0;
    loop {
        let batch = store
            .reserve_pending(batch_size, 5)
            .await
            .expect("reserve should succeed");
        if batch.is_empty() {
            return claimed;
        }
        claimed += batch.len();
    }
}

/// Benchmark: insert N items, then claim them in batches of 5.
fn bench_seed_and_drain(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("seed_and_drain");
    group.sample_size(20);

    for count in [50usize, 200] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(
            BenchmarkId::new("in_memory", count),
            &count,
            |b, &count| {
                b.to_async(&rt).iter(|| async move {
                    let store = InMemoryRecordStore::new(ItemKind::Asset);
                    seed_photos(&store, count).await.expect("seed");
                    assert_eq!(drain(&store, 5).await, count);
                });
            },
        );

        #[cfg(feature = "sqlite")]
        group.bench_with_input(
            BenchmarkId::new("sqlite", count),
            &count,
            |b, &count| {
                b.to_async(&rt).iter(|| async move {
                    let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
                        .await
                        .expect("open store");
                    seed_photos(&store, count).await.expect("seed");
                    assert_eq!(drain(&store, 5).await, count);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: failed attempt bookkeeping (increment, back to pending).
fn bench_retry_bookkeeping(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("retry_bookkeeping");

    let store = InMemoryRecordStore::new(ItemKind::Asset);
    let id = rt
        .block_on(seed_photos(&store, 1))
        .expect("seed")[0];

    group.bench_function("in_memory", |b| {
        b.to_async(&rt).iter(|| async {
            store.increment_retry_capped(id, u32::MAX).await.expect("increment");
            store.set_pending(id).await.expect("set pending");
        });
    });

    group.finish();
}

criterion_group!(benches, bench_seed_and_drain, bench_retry_bookkeeping);
criterion_main!(benches);
