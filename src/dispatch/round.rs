use super::feeder::{BatchSizePolicy, FeederReport, PacingFeeder};
use super::latency::LatencyWindow;
use super::pool::WorkerPool;
use super::queue::DispatchQueue;
use super::shutdown::{ShutdownCoordinator, ShutdownState};
use super::signals::DispatchSignals;
use super::worker::{WorkerContext, WorkerStats};
use crate::config::DispatchConfig;
use crate::key::Key;
use crate::requester::Requester;
use crate::results::{unflatten, BatchKeyRegistry, ResultStore, RoundResults, RoundSummary};
use crate::{Error, ErrorContext, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument, Span};

/// Outcome of one round, after every worker has exited.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub index: u32,
    pub results: RoundResults,
    /// Keys of the round's backlog, in dispatch order.
    pub backlog: Vec<Key>,
    /// Backlog entries no worker picked up (hard cancel only).
    pub pending: Vec<(Key, Value)>,
    pub cancelled: bool,
    pub batches: usize,
    pub elapsed: Duration,
    pub workers: Vec<WorkerStats>,
}

impl RoundReport {
    /// Distinct failed keys in backlog order.
    pub fn failed_keys(&self) -> Vec<Key> {
        let mut seen = HashSet::new();
        self.backlog
            .iter()
            .filter(|k| self.results.failures.contains_key(*k) && seen.insert(*k))
            .cloned()
            .collect()
    }

    /// True when every backlog key is accounted for exactly once.
    pub fn is_covered(&self) -> bool {
        let pending: HashSet<&Key> = self.pending.iter().map(|(k, _)| k).collect();
        self.results.is_disjoint()
            && self.backlog.iter().all(|k| {
                let recorded = self.results.contains(k);
                recorded != pending.contains(k)
            })
    }

    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            index: self.index,
            dispatched: self.backlog.len() - self.pending.len(),
            succeeded: self.results.successes.len(),
            failed: self.results.failures.len(),
            pending: self.pending.len(),
            elapsed: self.elapsed,
        }
    }
}

/// A running round.
///
/// [`wait`](Self::wait) blocks until the round has stopped and every worker
/// has exited, then returns the unflattened results. Dropping the handle
/// before that hard-cancels the round.
pub struct RoundHandle {
    index: u32,
    coordinator: ShutdownCoordinator,
    queue: Arc<DispatchQueue>,
    latency: Arc<LatencyWindow>,
    store: Arc<ResultStore>,
    batch_keys: Arc<BatchKeyRegistry>,
    batch_size: Arc<AtomicUsize>,
    backlog: Vec<Key>,
    workers: usize,
    pool: Option<WorkerPool>,
    feeder: Option<JoinHandle<FeederReport>>,
    supervisor: Option<JoinHandle<()>>,
    started: Instant,
    span: Span,
}

impl RoundHandle {
    /// Spawns the feeder, the supervisor and the workers of a round.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start(
        index: u32,
        backlog: Vec<(Key, Value)>,
        requester: Arc<dyn Requester>,
        config: &DispatchConfig,
        parent: &CancellationToken,
        span: Span,
    ) -> Self {
        let coordinator = ShutdownCoordinator::new(parent, config.drain_poll());
        let queue = Arc::new(DispatchQueue::new(config.queue_capacity()));
        let latency = Arc::new(LatencyWindow::new(config.min_requests));
        let store = Arc::new(ResultStore::new());
        let batch_keys = Arc::new(BatchKeyRegistry::new());
        let batch_size = Arc::new(AtomicUsize::new(1));
        let keys: Vec<Key> = backlog.iter().map(|(k, _)| k.clone()).collect();

        span.in_scope(|| {
            info!(
                backlog = keys.len(),
                workers = config.worker_count(),
                queue_capacity = queue.capacity(),
                interval_ms = config.interval().as_secs_f64() * 1000.0,
                "round started"
            )
        });

        let supervisor = {
            let coordinator = coordinator.clone();
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { coordinator.supervise(&queue).await }.instrument(span.clone()))
        };

        let ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            requester,
            latency: Arc::clone(&latency),
            store: Arc::clone(&store),
            record_timestamps: config.verbose,
            pull_timeout: config.pull_timeout(),
        });
        let pool = WorkerPool::spawn(config.worker_count(), ctx, &coordinator, &span);

        let feeder = PacingFeeder {
            backlog: backlog.into(),
            interval: config.interval(),
            policy: BatchSizePolicy::from_config(config),
            queue: Arc::clone(&queue),
            latency: Arc::clone(&latency),
            batch_keys: Arc::clone(&batch_keys),
            coordinator: coordinator.clone(),
            batch_size: Arc::clone(&batch_size),
        };
        let feeder = tokio::spawn(feeder.run().instrument(span.clone()));

        Self {
            index,
            coordinator,
            queue,
            latency,
            store,
            batch_keys,
            batch_size,
            backlog: keys,
            workers: pool.len(),
            pool: Some(pool),
            feeder: Some(feeder),
            supervisor: Some(supervisor),
            started: Instant::now(),
            span,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn state(&self) -> ShutdownState {
        self.coordinator.state()
    }

    /// Stops the round now. In-flight requests finish; queued and unsent
    /// arguments are reported as pending.
    pub fn cancel(&self) {
        self.coordinator.hard_cancel();
    }

    pub fn signals(&self) -> DispatchSignals {
        DispatchSignals {
            round: self.index,
            state: self.coordinator.state(),
            queue_len: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            batch_size: self.batch_size.load(Ordering::Relaxed),
            latency_samples: self.latency.len(),
            latency_median: self.latency.median(),
            completed: self.store.len(),
            workers: self.workers,
        }
    }

    /// Waits for the round to stop and all workers to exit.
    pub async fn wait(mut self) -> Result<RoundReport> {
        let span = self.span.clone();
        async move {
            let coordinator = &self.coordinator;
            let feeder_task = self.feeder.take();
            let supervisor_task = self.supervisor.take();

            // The coordinator only leaves Running once the feeder signals the
            // end of production, so a failed feeder has to stop the round.
            let feeder = async move {
                match feeder_task {
                    Some(task) => task.await.map_err(|e| {
                        coordinator.hard_cancel();
                        join_error("pacing_feeder", e)
                    }),
                    None => Ok(FeederReport::default()),
                }
            };
            let supervisor = async move {
                match supervisor_task {
                    Some(task) => task.await.map_err(|e| join_error("shutdown_coordinator", e)),
                    None => Ok(()),
                }
            };
            let (feeder, supervised) = tokio::join!(feeder, supervisor);
            if supervised.is_err() {
                coordinator.hard_cancel();
            }

            let workers = match self.pool.take() {
                Some(pool) => pool.join().await?,
                None => Vec::new(),
            };
            supervised?;
            let feeder = feeder?;

            let results = unflatten(self.store.take(), &self.batch_keys.snapshot());
            let mut pending: Vec<(Key, Value)> = self
                .queue
                .drain()
                .await
                .into_iter()
                .flat_map(|b| b.into_entries())
                .chain(feeder.pending)
                .collect();
            pending.retain(|(k, _)| !results.contains(k));

            let report = RoundReport {
                index: self.index,
                results,
                backlog: std::mem::take(&mut self.backlog),
                pending,
                cancelled: self.coordinator.was_cancelled(),
                batches: feeder.batches,
                elapsed: self.started.elapsed(),
                workers,
            };
            info!(
                successes = report.results.successes.len(),
                failures = report.results.failures.len(),
                pending = report.pending.len(),
                batches = report.batches,
                cancelled = report.cancelled,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "round finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

impl Drop for RoundHandle {
    fn drop(&mut self) {
        self.coordinator.hard_cancel();
    }
}

fn join_error(task: &str, e: tokio::task::JoinError) -> Error {
    Error::runtime_with_context(
        format!("{} task failed: {}", task, e),
        ErrorContext::new().with_source(task),
    )
}
