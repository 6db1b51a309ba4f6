use super::latency::LatencyWindow;
use super::queue::{Batch, DispatchQueue};
use super::shutdown::ShutdownCoordinator;
use crate::config::DispatchConfig;
use crate::key::Key;
use crate::results::BatchKeyRegistry;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Chooses the size of the next batch from recent latencies.
///
/// Bulk batches are used only while the latency window is full and its
/// median is below `max_duration`; anything else falls back to single
/// requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSizePolicy {
    pub bulk: bool,
    pub max_batch_size: usize,
    pub max_duration: Duration,
}

impl BatchSizePolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            bulk: config.use_bulk_requests,
            max_batch_size: config.max_batch_size.max(1),
            max_duration: config.max_duration(),
        }
    }

    pub fn decide(&self, window: &LatencyWindow) -> usize {
        if !self.bulk {
            return 1;
        }
        match window.median() {
            Some(median) if median < self.max_duration => self.max_batch_size,
            _ => 1,
        }
    }
}

/// What the feeder did before it returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeederReport {
    pub batches: usize,
    pub dispatched: usize,
    /// Backlog entries never pushed (non-empty only after a hard cancel).
    pub pending: Vec<(Key, Value)>,
}

/// Paced producer: one batch per interval tick.
///
/// The first tick fires immediately. When the workers fall behind, the
/// bounded queue blocks `push`, and ticks missed meanwhile are not
/// replayed in a burst.
pub struct PacingFeeder {
    pub(crate) backlog: VecDeque<(Key, Value)>,
    pub(crate) interval: Duration,
    pub(crate) policy: BatchSizePolicy,
    pub(crate) queue: Arc<DispatchQueue>,
    pub(crate) latency: Arc<LatencyWindow>,
    pub(crate) batch_keys: Arc<BatchKeyRegistry>,
    pub(crate) coordinator: ShutdownCoordinator,
    pub(crate) batch_size: Arc<AtomicUsize>,
}

impl PacingFeeder {
    pub async fn run(mut self) -> FeederReport {
        let token = self.coordinator.token();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report = FeederReport::default();
        let mut last_size = 0;

        loop {
            if self.backlog.is_empty() {
                self.coordinator.production_finished();
                break;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let size = self.policy.decide(&self.latency);
            if size != last_size {
                debug!(batch_size = size, "batch size changed");
                last_size = size;
            }
            self.batch_size.store(size, Ordering::Relaxed);

            let take = size.min(self.backlog.len());
            let batch = Batch::new(self.backlog.drain(..take).collect());
            if batch.is_bulk() {
                self.batch_keys.register(batch.key());
            }

            let unsent = {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = self.queue.reserve() => permit,
                };
                match permit {
                    Some(permit) => {
                        trace!(args = take, "batch queued");
                        permit.send(batch);
                        report.batches += 1;
                        report.dispatched += take;
                        None
                    }
                    None => Some(batch),
                }
            };
            if let Some(batch) = unsent {
                self.restore(batch);
                break;
            }
        }

        report.pending = self.backlog.into_iter().collect();
        report
    }

    fn restore(&mut self, batch: Batch) {
        for entry in batch.into_entries().into_iter().rev() {
            self.backlog.push_front(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::to_key;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn policy(bulk: bool) -> BatchSizePolicy {
        BatchSizePolicy {
            bulk,
            max_batch_size: 10,
            max_duration: Duration::from_secs(1),
        }
    }

    fn full_window(ms: u64) -> LatencyWindow {
        let window = LatencyWindow::new(15);
        for _ in 0..15 {
            window.record(Duration::from_millis(ms));
        }
        window
    }

    #[test]
    fn test_policy_needs_full_window() {
        let window = LatencyWindow::new(15);
        for _ in 0..14 {
            window.record(Duration::from_millis(1));
        }
        assert_eq!(policy(true).decide(&window), 1);
        window.record(Duration::from_millis(1));
        assert_eq!(policy(true).decide(&window), 10);
    }

    #[test]
    fn test_policy_threshold_and_bulk_flag() {
        assert_eq!(policy(true).decide(&full_window(999)), 10);
        assert_eq!(policy(true).decide(&full_window(1000)), 1);
        assert_eq!(policy(false).decide(&full_window(1)), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let config = DispatchConfig::new().with_max_batch_size(0).with_bulk_requests(false);
        let p = BatchSizePolicy::from_config(&config);
        assert_eq!(p.max_batch_size, 1);
        assert!(!p.bulk);
        assert_eq!(p.max_duration, Duration::from_secs(1));
    }

    fn feeder(args: &[i64], capacity: usize, latency: Arc<LatencyWindow>) -> (PacingFeeder, CancellationToken) {
        let parent = CancellationToken::new();
        let coordinator = ShutdownCoordinator::new(&parent, Duration::from_millis(1));
        let backlog = args
            .iter()
            .map(|a| (to_key(&json!(a)).unwrap(), json!(a)))
            .collect();
        let feeder = PacingFeeder {
            backlog,
            interval: Duration::from_millis(1),
            policy: policy(true),
            queue: Arc::new(DispatchQueue::new(capacity)),
            latency,
            batch_keys: Arc::new(BatchKeyRegistry::new()),
            coordinator,
            batch_size: Arc::new(AtomicUsize::new(1)),
        };
        (feeder, parent)
    }

    #[tokio::test]
    async fn test_empty_backlog_finishes_immediately() {
        let (f, _parent) = feeder(&[], 1, Arc::new(LatencyWindow::new(15)));
        let coordinator = f.coordinator.clone();
        let report = f.run().await;
        assert_eq!(report, FeederReport::default());
        assert_eq!(coordinator.state(), crate::dispatch::ShutdownState::Draining);
    }

    #[tokio::test]
    async fn test_pushes_everything_in_order() {
        let (f, _parent) = feeder(&[1, 2, 3], 4, Arc::new(LatencyWindow::new(15)));
        let queue = Arc::clone(&f.queue);
        let report = f.run().await;
        assert_eq!(report.batches, 3);
        assert_eq!(report.dispatched, 3);
        let keys: Vec<Key> = queue.drain().await.iter().map(Batch::key).collect();
        assert_eq!(keys, vec![Key::Int(1), Key::Int(2), Key::Int(3)]);
    }

    #[tokio::test]
    async fn test_bulk_batches_are_registered() {
        let fast = Arc::new(full_window(1));
        let args: Vec<i64> = (0..25).collect();
        let (f, _parent) = feeder(&args, 8, fast);
        let queue = Arc::clone(&f.queue);
        let registry = Arc::clone(&f.batch_keys);
        let report = f.run().await;
        assert_eq!(report.batches, 3);
        let batches = queue.drain().await;
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert_eq!(registry.len(), 3);
        assert!(batches.iter().all(|b| registry.contains(&b.key())));
    }

    #[tokio::test]
    async fn test_cancel_while_blocked_keeps_batch_pending() {
        let (f, parent) = feeder(&[1, 2, 3, 4], 2, Arc::new(LatencyWindow::new(15)));
        let handle = tokio::spawn(f.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        parent.cancel();
        let report = handle.await.unwrap();
        assert_eq!(report.dispatched, 2);
        let pending: Vec<Key> = report.pending.into_iter().map(|(k, _)| k).collect();
        assert_eq!(pending, vec![Key::Int(3), Key::Int(4)]);
    }
}
