//! Benchmarks for the per-request bookkeeping hot paths
//!
//! This benchmark measures:
//! - Argument canonicalization and key-to-argument reconstruction
//! - Latency window record + median
//! - Batch unflattening after a round
//! - Queue push/pull round trips

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use paced_dispatch::dispatch::{Batch, DispatchQueue, LatencyWindow};
use paced_dispatch::results::{unflatten, RawResults};
use paced_dispatch::{to_key, Key};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

fn nested(depth: usize) -> Value {
    (0..depth).fold(json!([1, "leaf", 2.5]), |inner, i| json!([i, inner, [i, i + 1]]))
}

fn bench_to_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("to_key");

    group.bench_function("scalar", |b| {
        let arg = json!(864691135);
        b.iter(|| black_box(to_key(black_box(&arg)).unwrap()))
    });

    group.bench_function("edge_pair", |b| {
        let arg = json!([[864691135, 2], [864691136, 7]]);
        b.iter(|| black_box(to_key(black_box(&arg)).unwrap()))
    });

    for depth in [1, 4, 16] {
        let arg = nested(depth);
        group.bench_with_input(BenchmarkId::new("nested", depth), &arg, |b, arg| {
            b.iter(|| black_box(to_key(black_box(arg)).unwrap()))
        });
    }

    group.finish();
}

fn bench_to_argument(c: &mut Criterion) {
    let key = to_key(&nested(8)).unwrap();
    c.bench_function("to_argument/nested_8", |b| {
        b.iter(|| black_box(black_box(&key).to_argument()))
    });
}

fn bench_latency_window(c: &mut Criterion) {
    let window = LatencyWindow::new(15);
    let mut i = 0u64;
    c.bench_function("latency_window/record_and_median", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            window.record(Duration::from_micros(i % 997));
            black_box(window.median())
        })
    });
}

fn bench_unflatten(c: &mut Criterion) {
    let mut group = c.benchmark_group("unflatten");

    for batches in [10usize, 100, 1000] {
        let mut raw = RawResults::default();
        let mut registry = HashSet::new();
        for n in 0..batches {
            let keys: Vec<Key> = (0..50).map(|i| Key::Int((n * 50 + i) as i64)).collect();
            let key = Key::batch(keys);
            registry.insert(key.clone());
            raw.successes.insert(key, json!({ "batch": n }));
        }
        group.throughput(Throughput::Elements((batches * 50) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batches), &raw, |b, raw| {
            b.iter(|| black_box(unflatten(raw.clone(), &registry)))
        });
    }

    group.finish();
}

fn bench_queue_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let queue = DispatchQueue::new(64);
    let batch = Batch::from_args((0..50).map(|i| json!(i)).collect()).unwrap();

    c.bench_function("queue/push_pull", |b| {
        b.to_async(&rt).iter(|| async {
            queue.push(batch.clone()).await;
            black_box(queue.pull(Duration::from_millis(10)).await)
        })
    });
}

criterion_group!(
    benches,
    bench_to_key,
    bench_to_argument,
    bench_latency_window,
    bench_unflatten,
    bench_queue_round_trip
);
criterion_main!(benches);
