//! Dispatch configuration.
//!
//! Built in code (`DispatchConfig::new().with_rate(10, 1.0)`), loaded from a
//! YAML/JSON file, or overlaid from `PACED_DISPATCH_*` environment variables.
//!
//! ```yaml
//! Nrequests: 10000
//! period: 100
//! use_bulk_requests: true
//! max_batch_size: 50
//! max_repeat: 3
//! ```

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Upper bound for the derived default worker count.
pub const MAX_DEFAULT_WORKERS: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Dispatches allowed per `period_secs`.
    #[serde(alias = "Nrequests")]
    pub requests_per_period: u32,
    #[serde(alias = "period")]
    pub period_secs: f64,
    pub use_bulk_requests: bool,
    pub max_batch_size: usize,
    /// `None` derives `min(32, available_parallelism + 4)`.
    pub max_workers: Option<usize>,
    /// Maximum number of rounds, the first one included.
    pub max_repeat: u32,
    /// Report per-argument dispatch timestamps.
    pub verbose: bool,
    /// Latency samples required before bulk batches are considered.
    pub min_requests: usize,
    /// Median latency below which bulk batches are used.
    pub max_duration_secs: f64,
    pub pull_timeout_ms: u64,
    pub drain_poll_ms: u64,
    /// Where to write the final report as JSON.
    pub log_file: Option<PathBuf>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            requests_per_period: 10_000,
            period_secs: 100.0,
            use_bulk_requests: true,
            max_batch_size: 50,
            max_workers: None,
            max_repeat: 3,
            verbose: false,
            min_requests: 15,
            max_duration_secs: 1.0,
            pull_timeout_ms: 2_000,
            drain_poll_ms: 10,
            log_file: None,
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `requests` dispatches every `period_secs` seconds.
    pub fn with_rate(mut self, requests: u32, period_secs: f64) -> Self {
        self.requests_per_period = requests;
        self.period_secs = period_secs;
        self
    }

    pub fn with_bulk_requests(mut self, enable: bool) -> Self {
        self.use_bulk_requests = enable;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn with_max_repeat(mut self, rounds: u32) -> Self {
        self.max_repeat = rounds;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_min_requests(mut self, samples: usize) -> Self {
        self.min_requests = samples;
        self
    }

    pub fn with_max_duration(mut self, threshold: Duration) -> Self {
        self.max_duration_secs = threshold.as_secs_f64();
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Spacing between two pacing ticks: `period / Nrequests`.
    pub fn interval(&self) -> Duration {
        let secs = self.period_secs / f64::from(self.requests_per_period.max(1));
        Duration::try_from_secs_f64(secs)
            .unwrap_or(Duration::MAX)
            .max(Duration::from_nanos(1))
    }

    /// Dispatch queue capacity: half a second's worth of the rate, at least 1.
    pub fn queue_capacity(&self) -> usize {
        let rate = f64::from(self.requests_per_period) / self.period_secs;
        ((rate / 2.0).ceil() as usize).max(1)
    }

    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(default_max_workers)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_duration_secs).unwrap_or(Duration::MAX)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.requests_per_period == 0 {
            return Err(invalid("requests_per_period", "must be at least 1"));
        }
        if !self.period_secs.is_finite() || self.period_secs <= 0.0 {
            return Err(invalid("period_secs", "must be a positive number of seconds"));
        }
        let interval = seconds(
            "period_secs",
            self.period_secs / f64::from(self.requests_per_period),
        )?;
        if interval.is_zero() {
            return Err(invalid("period_secs", "leaves no time between two requests"));
        }
        if self.max_batch_size == 0 {
            return Err(invalid("max_batch_size", "must be at least 1"));
        }
        if self.max_workers == Some(0) {
            return Err(invalid("max_workers", "must be at least 1"));
        }
        if self.max_repeat == 0 {
            return Err(invalid("max_repeat", "must be at least 1"));
        }
        if self.min_requests == 0 {
            return Err(invalid("min_requests", "must be at least 1"));
        }
        if !self.max_duration_secs.is_finite() || self.max_duration_secs <= 0.0 {
            return Err(invalid("max_duration_secs", "must be a positive number of seconds"));
        }
        seconds("max_duration_secs", self.max_duration_secs)?;
        if self.pull_timeout_ms == 0 {
            return Err(invalid("pull_timeout_ms", "must be at least 1"));
        }
        if self.drain_poll_ms == 0 {
            return Err(invalid("drain_poll_ms", "must be at least 1"));
        }
        Ok(())
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_yaml_str(&raw),
        }
    }

    /// Overlays `PACED_DISPATCH_*` environment variables.
    ///
    /// - `PACED_DISPATCH_REQUESTS`
    /// - `PACED_DISPATCH_PERIOD_SECS`
    /// - `PACED_DISPATCH_MAX_WORKERS`
    /// - `PACED_DISPATCH_MAX_REPEAT`
    /// - `PACED_DISPATCH_BULK`
    /// - `PACED_DISPATCH_MAX_BATCH_SIZE`
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    pub fn with_overrides_from<L>(mut self, lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "PACED_DISPATCH_REQUESTS")? {
            self.requests_per_period = v;
        }
        if let Some(v) = parse_var(&lookup, "PACED_DISPATCH_PERIOD_SECS")? {
            self.period_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "PACED_DISPATCH_MAX_WORKERS")? {
            self.max_workers = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "PACED_DISPATCH_MAX_REPEAT")? {
            self.max_repeat = v;
        }
        if let Some(v) = parse_var(&lookup, "PACED_DISPATCH_BULK")? {
            self.use_bulk_requests = v;
        }
        if let Some(v) = parse_var(&lookup, "PACED_DISPATCH_MAX_BATCH_SIZE")? {
            self.max_batch_size = v;
        }
        self.validate()?;
        Ok(self)
    }
}

/// `min(32, available_parallelism + 4)`, falling back to one core when the
/// host does not report its parallelism.
pub fn default_max_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores + 4).min(MAX_DEFAULT_WORKERS)
}

fn parse_var<L, T>(lookup: &L, name: &str) -> Result<Option<T>>
where
    L: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid value {:?}: {}", raw, e),
                ErrorContext::new()
                    .with_field_path(name)
                    .with_source("env"),
            )
        }),
    }
}

/// A duration the runtime clock can still add to the current instant.
fn seconds(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| Instant::now().checked_add(*d).is_some())
        .ok_or_else(|| invalid(field, "is out of range"))
}

fn invalid(field: &str, msg: &str) -> Error {
    Error::configuration_with_context(
        format!("{} {}", field, msg),
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config"),
    )
}
