use super::queue::DispatchQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownState {
    /// The feeder is still producing.
    Running,
    /// Production finished; waiting for the queue to empty.
    Draining,
    /// Workers have been told to exit.
    Stopped,
}

impl ShutdownState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownState::Running => "running",
            ShutdownState::Draining => "draining",
            ShutdownState::Stopped => "stopped",
        }
    }
}

/// Decides when a round's workers may stop.
///
/// Planned shutdown goes `Running -> Draining -> Stopped`: the feeder reports
/// that its backlog is exhausted, then [`supervise`](Self::supervise) waits
/// for the queue to empty before cancelling the round token. A hard cancel
/// (or cancellation of the parent token) jumps straight to `Stopped`.
///
/// Stopping only cancels the token; workers finish their in-flight request
/// before exiting, so no processed result is lost.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: watch::Sender<ShutdownState>,
    token: CancellationToken,
    hard_cancelled: AtomicBool,
    poll: Duration,
}

impl ShutdownCoordinator {
    /// Creates a coordinator whose round token is a child of `parent`.
    pub fn new(parent: &CancellationToken, poll: Duration) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            inner: Arc::new(Inner {
                state,
                token: parent.child_token(),
                hard_cancelled: AtomicBool::new(false),
                poll: poll.max(Duration::from_millis(1)),
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.inner.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ShutdownState::Stopped
    }

    /// True when the round ended through a hard cancel rather than a drain.
    pub fn was_cancelled(&self) -> bool {
        self.inner.hard_cancelled.load(Ordering::Acquire)
    }

    /// Round-level token, cancelled on stop.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Token for one worker: cancelled with the round, or on its own.
    pub fn worker_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// Signals that the feeder will push nothing more. Idempotent.
    pub fn production_finished(&self) {
        let moved = self.inner.state.send_if_modified(|s| {
            if *s == ShutdownState::Running {
                *s = ShutdownState::Draining;
                true
            } else {
                false
            }
        });
        if moved {
            debug!("production finished, draining queue");
        }
    }

    /// Stops the round immediately; queued batches are left unprocessed.
    pub fn hard_cancel(&self) {
        if self.is_stopped() {
            return;
        }
        if !self.inner.hard_cancelled.swap(true, Ordering::AcqRel) {
            info!(state = self.state().as_str(), "hard cancel requested");
        }
        self.stop();
    }

    fn stop(&self) {
        self.inner.state.send_if_modified(|s| {
            let changed = *s != ShutdownState::Stopped;
            *s = ShutdownState::Stopped;
            changed
        });
        self.inner.token.cancel();
    }

    /// Drives the state machine until the round is stopped.
    pub async fn supervise(&self, queue: &DispatchQueue) {
        let token = self.token();
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ShutdownState::Stopped => return,
                ShutdownState::Draining => break,
                ShutdownState::Running => {}
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.on_external_cancel();
                    return;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        loop {
            if self.is_stopped() {
                return;
            }
            if token.is_cancelled() {
                self.on_external_cancel();
                return;
            }
            if queue.is_empty() {
                debug!("queue drained, stopping workers");
                self.stop();
                return;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(self.inner.poll) => {}
            }
        }
    }

    fn on_external_cancel(&self) {
        if !self.is_stopped() {
            self.inner.hard_cancelled.store(true, Ordering::Release);
            self.stop();
        }
    }

    /// Resolves once the round reaches `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == ShutdownState::Stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::queue::Batch;
    use serde_json::json;

    fn coordinator() -> (CancellationToken, ShutdownCoordinator) {
        let parent = CancellationToken::new();
        let c = ShutdownCoordinator::new(&parent, Duration::from_millis(2));
        (parent, c)
    }

    #[test]
    fn test_production_finished_is_idempotent() {
        let (_p, c) = coordinator();
        assert_eq!(c.state(), ShutdownState::Running);
        c.production_finished();
        c.production_finished();
        assert_eq!(c.state(), ShutdownState::Draining);
        assert!(!c.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_waits_for_empty_queue() {
        let (_p, c) = coordinator();
        let queue = Arc::new(DispatchQueue::new(2));
        queue.push(Batch::from_args(vec![json!(1)]).unwrap()).await;

        let sup = {
            let c = c.clone();
            let q = Arc::clone(&queue);
            tokio::spawn(async move { c.supervise(&q).await })
        };
        c.production_finished();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(c.state(), ShutdownState::Draining);
        assert!(!c.worker_token().is_cancelled());

        queue.pull(Duration::from_millis(10)).await.unwrap();
        sup.await.unwrap();
        assert_eq!(c.state(), ShutdownState::Stopped);
        assert!(c.token().is_cancelled());
        assert!(!c.was_cancelled());
    }

    #[tokio::test]
    async fn test_hard_cancel_skips_drain() {
        let (_p, c) = coordinator();
        let queue = DispatchQueue::new(2);
        queue.push(Batch::from_args(vec![json!(1)]).unwrap()).await;
        let worker = c.worker_token();
        c.hard_cancel();
        c.supervise(&queue).await;
        assert_eq!(c.state(), ShutdownState::Stopped);
        assert!(worker.is_cancelled());
        assert!(c.was_cancelled());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_round() {
        let (parent, c) = coordinator();
        let queue = Arc::new(DispatchQueue::new(1));
        let sup = {
            let c = c.clone();
            let q = Arc::clone(&queue);
            tokio::spawn(async move { c.supervise(&q).await })
        };
        parent.cancel();
        sup.await.unwrap();
        c.stopped().await;
        assert!(c.was_cancelled());
    }

    #[test]
    fn test_worker_token_independent() {
        let (_p, c) = coordinator();
        let a = c.worker_token();
        let b = c.worker_token();
        a.cancel();
        assert!(!b.is_cancelled());
        assert!(!c.token().is_cancelled());
    }
}
