//! Paced Requests Example
//!
//! Dispatches 200 arguments at 20 requests per second against a simulated
//! service whose latency varies and which rejects roughly one call in eight.
//! Watch the batch size switch to bulk once the latency window fills, and the
//! retry rounds pick up the rejected arguments.
//!
//! Run with `RUST_LOG=paced_dispatch=debug cargo run --example paced_requests`.

use paced_dispatch::{requester, DispatchConfig, Dispatcher, Payload, RequestError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let service = requester::from_fn(move |payload: Payload| {
        let n = counter.fetch_add(1, Ordering::Relaxed);
        async move {
            tokio::time::sleep(Duration::from_millis(20 + (n as u64 * 37) % 80)).await;
            if n % 8 == 7 {
                return Err(RequestError::http(429));
            }
            Ok(json!({ "served": payload.len(), "call": n }))
        }
    });

    let config = DispatchConfig::new()
        .with_rate(20, 1.0)
        .with_max_batch_size(10)
        .with_max_repeat(4)
        .with_verbose(true)
        .with_env_overrides()?;
    let dispatcher = Dispatcher::new(service, config)?;

    let args = (0..200).map(|segment| json!([segment, segment + 1])).collect();
    let report = dispatcher.run(args).await?;

    println!("rounds:");
    for round in &report.rounds {
        println!(
            "  #{} dispatched={} ok={} failed={} in {:.2}s",
            round.index,
            round.dispatched,
            round.succeeded,
            round.failed,
            round.elapsed.as_secs_f64()
        );
    }
    println!(
        "{} succeeded, {} failed, {} calls made",
        report.successes.len(),
        report.failures.len(),
        calls.load(Ordering::Relaxed)
    );
    for (key, failure) in &report.failures {
        println!("  {} -> {}", key, failure);
    }
    Ok(())
}
