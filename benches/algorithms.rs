//! Benchmarks for the in-process algorithm primitives.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ratelimit_decision::{Clock, FixedWindow, LeakyBucket, Limiter, SlidingWindow, SystemClock, TokenBucket};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_algorithms(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mut group = c.benchmark_group("algorithms");

    group.bench_function("token_bucket", |b| {
        let bucket = TokenBucket::new(1_000_000, 1_000.0, clock.clone());
        b.iter(|| rt.block_on(async { black_box(bucket.try_consume(1).await) }))
    });

    group.bench_function("sliding_window", |b| {
        let window = SlidingWindow::new(1_000_000, clock.clone());
        b.iter(|| rt.block_on(async { black_box(window.try_consume(1).await) }))
    });

    group.bench_function("fixed_window", |b| {
        let window = FixedWindow::new(1_000_000, 1000, clock.clone());
        b.iter(|| rt.block_on(async { black_box(window.try_consume(1).await) }))
    });

    group.bench_function("leaky_bucket_try_consume", |b| {
        let bucket = LeakyBucket::new(1_000_000, 10_000.0, 30_000, clock.clone());
        b.iter(|| rt.block_on(async { black_box(bucket.try_consume(1).await) }))
    });

    group.finish();
}

fn bench_key_cardinality(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mut group = c.benchmark_group("token_bucket_by_cardinality");
    for num_keys in [1, 10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("distinct_instances", num_keys), num_keys, |b, &num_keys| {
            let buckets: Vec<_> =
                (0..num_keys).map(|_| TokenBucket::new(1_000_000, 1_000.0, clock.clone())).collect();
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % buckets.len().max(1);
                rt.block_on(async { black_box(buckets[i].try_consume(1).await) })
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_algorithms, bench_key_cardinality);
criterion_main!(benches);
