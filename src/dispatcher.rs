//! Round-based retry driver.
//!
//! [`Dispatcher::run`] executes up to `max_repeat` rounds. Round 1 gets the
//! caller's arguments; every later round gets the arguments that failed in
//! the round before it, rebuilt from their keys. Successes accumulate across
//! rounds and are never overwritten; the failures reported are those of the
//! last round that ran.

use crate::config::DispatchConfig;
use crate::dispatch::RoundHandle;
use crate::key::{to_key, Key};
use crate::requester::Requester;
use crate::results::DispatchReport;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};
use uuid::Uuid;

/// Cancels a dispatcher's current round and every round after it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Rate-limited dispatcher over a [`Requester`].
///
/// ```rust,no_run
/// use paced_dispatch::{requester, DispatchConfig, Dispatcher, Payload};
/// use serde_json::json;
///
/// # async fn demo() -> paced_dispatch::Result<()> {
/// let config = DispatchConfig::new().with_rate(10, 1.0).with_max_workers(4);
/// let dispatcher = Dispatcher::new(
///     requester::from_fn(|p: Payload| async move {
///         Ok::<_, paced_dispatch::RequestError>(p.into_value())
///     }),
///     config,
/// )?;
/// let report = dispatcher.run((0..100).map(|i| json!(i)).collect()).await?;
/// assert!(report.is_complete());
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher {
    requester: Arc<dyn Requester>,
    config: DispatchConfig,
    token: CancellationToken,
    run_id: Uuid,
}

impl Dispatcher {
    pub fn new<R>(requester: R, config: DispatchConfig) -> Result<Self>
    where
        R: Requester + 'static,
    {
        Self::with_shared(Arc::new(requester), config)
    }

    pub fn with_shared(requester: Arc<dyn Requester>, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            requester,
            config,
            token: CancellationToken::new(),
            run_id: Uuid::new_v4(),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    /// Starts a single round over `args` without retries.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_round(&self, args: Vec<Value>) -> Result<RoundHandle> {
        let backlog = canonicalize(args)?;
        Ok(self.spawn_round(1, backlog))
    }

    fn spawn_round(&self, index: u32, backlog: Vec<(Key, Value)>) -> RoundHandle {
        let span = info_span!("dispatch_round", run_id = %self.run_id, round = index);
        RoundHandle::start(
            index,
            backlog,
            Arc::clone(&self.requester),
            &self.config,
            &self.token,
            span,
        )
    }

    /// Dispatches `args`, retrying failures for up to `max_repeat` rounds.
    ///
    /// # Errors
    ///
    /// Fails before anything is dispatched if an argument cannot be keyed.
    /// Request failures are never errors; they are reported in
    /// [`DispatchReport::failures`].
    pub async fn run(&self, args: Vec<Value>) -> Result<DispatchReport> {
        let mut backlog = canonicalize(args)?;
        info!(
            run_id = %self.run_id,
            arguments = backlog.len(),
            max_repeat = self.config.max_repeat,
            "dispatch started"
        );

        let mut successes = HashMap::new();
        let mut timestamps = HashMap::new();
        let mut failures = HashMap::new();
        let mut report = DispatchReport::default();

        for index in 1..=self.config.max_repeat {
            if backlog.is_empty() {
                break;
            }
            if self.token.is_cancelled() {
                report.pending = backlog.drain(..).map(|(_, arg)| arg).collect();
                report.cancelled = true;
                break;
            }

            let round = self.spawn_round(index, std::mem::take(&mut backlog)).wait().await?;
            report.rounds.push(round.summary());
            let failed = round.failed_keys();
            for (key, value) in round.results.successes {
                successes.entry(key).or_insert(value);
            }
            timestamps.extend(round.results.timestamps);
            failures = round.results.failures;

            if round.cancelled {
                report.pending = round.pending.into_iter().map(|(_, arg)| arg).collect();
                report.cancelled = true;
                break;
            }
            backlog = failed
                .into_iter()
                .map(|key| {
                    let arg = key.to_argument();
                    (key, arg)
                })
                .collect();
        }

        failures.retain(|k, _| !successes.contains_key(k));
        report.successes = successes;
        report.failures = failures;
        report.timestamps = self.config.verbose.then_some(timestamps);

        info!(
            run_id = %self.run_id,
            rounds = report.rounds.len(),
            successes = report.successes.len(),
            failures = report.failures.len(),
            pending = report.pending.len(),
            cancelled = report.cancelled,
            "dispatch finished"
        );

        if let Some(path) = &self.config.log_file {
            if let Err(e) = report.write_json(path) {
                warn!(path = %path.display(), error = %e, "failed to write dispatch log");
            }
        }
        Ok(report)
    }
}

/// One-shot helper: builds a [`Dispatcher`] and runs it.
pub async fn dispatch<R>(requester: R, args: Vec<Value>, config: DispatchConfig) -> Result<DispatchReport>
where
    R: Requester + 'static,
{
    Dispatcher::new(requester, config)?.run(args).await
}

fn canonicalize(args: Vec<Value>) -> Result<Vec<(Key, Value)>> {
    args.into_iter()
        .map(|arg| Ok((to_key(&arg)?, arg)))
        .collect()
}
