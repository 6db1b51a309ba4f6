use super::latency::LatencyWindow;
use super::queue::{Batch, DispatchQueue};
use crate::requester::Requester;
use crate::results::{FailureKind, Outcome, ResultStore};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Everything a worker shares with the rest of its round.
pub(crate) struct WorkerContext {
    pub queue: Arc<DispatchQueue>,
    pub requester: Arc<dyn Requester>,
    pub latency: Arc<LatencyWindow>,
    pub store: Arc<ResultStore>,
    pub record_timestamps: bool,
    pub pull_timeout: Duration,
}

/// Per-worker counters, reported when the worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub batches: usize,
    /// Arguments covered by successful requests.
    pub succeeded: usize,
    /// Arguments covered by failed requests.
    pub failed: usize,
}

/// Pulls batches until `token` is cancelled.
///
/// Cancellation is only observed between batches: a request that has
/// started always completes and its outcome is stored.
pub(crate) async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    token: CancellationToken,
) -> WorkerStats {
    let mut stats = WorkerStats {
        worker_id,
        ..WorkerStats::default()
    };
    trace!(worker_id, "worker started");

    loop {
        let pulled = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            pulled = ctx.queue.pull(ctx.pull_timeout) => pulled,
        };
        let Some(batch) = pulled else {
            continue;
        };
        process(worker_id, &ctx, batch, &mut stats).await;
    }

    trace!(worker_id, batches = stats.batches, "worker stopped");
    stats
}

async fn process(worker_id: usize, ctx: &WorkerContext, batch: Batch, stats: &mut WorkerStats) {
    let key = batch.key();
    let size = batch.len();
    let payload = batch.payload();
    let dispatched_at = ctx.record_timestamps.then(SystemTime::now);

    let started = Instant::now();
    let result = AssertUnwindSafe(ctx.requester.request(payload))
        .catch_unwind()
        .await;
    ctx.latency.record(started.elapsed());

    let outcome = match result {
        Ok(result) => Outcome::from(result),
        Err(panic) => Outcome::Failure(FailureKind::Unclassified {
            message: panic_message(panic.as_ref()),
        }),
    };
    match &outcome {
        Outcome::Success(_) => stats.succeeded += size,
        Outcome::Failure(kind) => {
            debug!(worker_id, key = %key, failure = %kind, "request failed");
            stats.failed += size;
        }
    }
    stats.batches += 1;
    ctx.store.record(key, outcome, dispatched_at);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "request panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::requester::{from_fn, Payload, RequestError};
    use serde_json::{json, Value};

    fn context(requester: Arc<dyn Requester>, timestamps: bool) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            queue: Arc::new(DispatchQueue::new(8)),
            requester,
            latency: Arc::new(LatencyWindow::new(15)),
            store: Arc::new(ResultStore::new()),
            record_timestamps: timestamps,
            pull_timeout: Duration::from_millis(5),
        })
    }

    fn echo() -> Arc<dyn Requester> {
        Arc::new(from_fn(|payload: Payload| async move {
            match payload.into_value() {
                Value::Number(n) if n.as_i64() == Some(13) => Err(RequestError::http(500)),
                v => Ok(json!({ "echo": v })),
            }
        }))
    }

    #[tokio::test]
    async fn test_processes_until_cancelled() {
        let ctx = context(echo(), true);
        for args in [vec![json!(1)], vec![json!(13)], vec![json!(2), json!(3)]] {
            ctx.queue.push(Batch::from_args(args).unwrap()).await;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(0, Arc::clone(&ctx), token.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.batches, 3);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.failed, 1);
        let raw = ctx.store.snapshot();
        assert_eq!(raw.successes.get(&Key::Int(1)), Some(&json!({"echo": 1})));
        assert_eq!(
            raw.failures.get(&Key::Int(13)),
            Some(&FailureKind::RemoteError { status: 500 })
        );
        assert!(raw
            .successes
            .contains_key(&Key::batch(vec![Key::Int(2), Key::Int(3)])));
        assert_eq!(raw.timestamps.len(), 3);
        assert_eq!(ctx.latency.len(), 3);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let requester: Arc<dyn Requester> = Arc::new(from_fn(|_p: Payload| async {
            if true {
                panic!("collaborator blew up");
            }
            Ok::<_, RequestError>(json!(null))
        }));
        let ctx = context(requester, false);
        ctx.queue.push(Batch::from_args(vec![json!("x")]).unwrap()).await;
        let token = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(1, Arc::clone(&ctx), token.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.failed, 1);
        let raw = ctx.store.snapshot();
        assert_eq!(
            raw.failures.get(&Key::Str("x".into())),
            Some(&FailureKind::Unclassified {
                message: "collaborator blew up".into()
            })
        );
        assert!(raw.timestamps.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_request_completes_after_cancel() {
        let requester: Arc<dyn Requester> = Arc::new(from_fn(|_p: Payload| async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok::<_, RequestError>(json!("slow"))
        }));
        let ctx = context(requester, false);
        ctx.queue.push(Batch::from_args(vec![json!(1)]).unwrap()).await;
        let token = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(2, Arc::clone(&ctx), token.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(ctx.store.snapshot().successes.get(&Key::Int(1)), Some(&json!("slow")));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "request panicked");
    }
}
