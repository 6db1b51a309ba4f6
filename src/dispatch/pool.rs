use super::shutdown::ShutdownCoordinator;
use super::worker::{worker_loop, WorkerContext, WorkerStats};
use crate::{Error, ErrorContext, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument, Span};

/// One spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    token: CancellationToken,
    join: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Stops this worker after its current request.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// The fixed set of workers of one round.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Spawns `count` workers, each holding a child of the round token.
    pub(crate) fn spawn(
        count: usize,
        ctx: Arc<WorkerContext>,
        coordinator: &ShutdownCoordinator,
        span: &Span,
    ) -> Self {
        let workers = (0..count.max(1))
            .map(|id| {
                let token = coordinator.worker_token();
                let join = tokio::spawn(
                    worker_loop(id, Arc::clone(&ctx), token.clone()).instrument(span.clone()),
                );
                WorkerHandle { id, token, join }
            })
            .collect::<Vec<_>>();
        debug!(workers = workers.len(), "worker pool started");
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn cancel_all(&self) {
        for worker in &self.workers {
            worker.cancel();
        }
    }

    /// Waits for every worker to exit.
    ///
    /// All workers are awaited even if one of them died; the first such
    /// failure is returned.
    pub async fn join(self) -> Result<Vec<WorkerStats>> {
        let joined = join_all(
            self.workers
                .into_iter()
                .map(|w| async move { (w.id, w.join.await) }),
        )
        .await;

        let mut stats = Vec::with_capacity(joined.len());
        let mut first_error = None;
        for (id, result) in joined {
            match result {
                Ok(s) => stats.push(s),
                Err(e) => {
                    first_error.get_or_insert_with(|| {
                        Error::runtime_with_context(
                            format!("worker {} terminated abnormally: {}", id, e),
                            ErrorContext::new().with_source("worker_pool"),
                        )
                    });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}
