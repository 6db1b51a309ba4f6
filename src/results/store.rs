use super::outcome::{FailureKind, Outcome};
use crate::key::Key;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

/// Raw per-key results as written by the workers (batch keys not expanded).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResults {
    pub successes: HashMap<Key, Value>,
    pub failures: HashMap<Key, FailureKind>,
    pub timestamps: HashMap<Key, SystemTime>,
}

impl RawResults {
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result store shared by all workers of a round.
///
/// Every write happens under one mutex, so concurrent workers never lose an
/// update. A key that has succeeded is never downgraded to a failure.
#[derive(Debug, Default)]
pub struct ResultStore {
    inner: Mutex<RawResults>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RawResults> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, key: Key, outcome: Outcome, dispatched_at: Option<SystemTime>) {
        let mut raw = self.lock();
        if let Some(at) = dispatched_at {
            raw.timestamps.insert(key.clone(), at);
        }
        match outcome {
            Outcome::Success(value) => {
                raw.failures.remove(&key);
                raw.successes.insert(key, value);
            }
            Outcome::Failure(kind) => {
                if !raw.successes.contains_key(&key) {
                    raw.failures.insert(key, kind);
                }
            }
        }
    }

    /// Number of recorded entries (batch entries count once).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> RawResults {
        self.lock().clone()
    }

    /// Moves the results out, leaving the store empty.
    pub fn take(&self) -> RawResults {
        std::mem::take(&mut *self.lock())
    }
}
