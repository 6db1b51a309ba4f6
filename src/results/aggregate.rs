use super::outcome::FailureKind;
use super::store::RawResults;
use crate::key::Key;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::SystemTime;

/// Keys of every bulk batch the feeder produced during a round.
#[derive(Debug, Default)]
pub struct BatchKeyRegistry {
    keys: Mutex<HashSet<Key>>,
}

impl BatchKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: Key) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> HashSet<Key> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Per-argument results of one round, batch entries already expanded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundResults {
    pub successes: HashMap<Key, Value>,
    pub failures: HashMap<Key, FailureKind>,
    pub timestamps: HashMap<Key, SystemTime>,
}

impl RoundResults {
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disjoint(&self) -> bool {
        self.failures.keys().all(|k| !self.successes.contains_key(k))
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.successes.contains_key(key) || self.failures.contains_key(key)
    }
}

/// Expands every registered batch entry into one entry per argument.
///
/// Each argument of a batch inherits the whole batch outcome (the same
/// response value, failure or timestamp). An entry recorded for the argument
/// itself takes precedence over one inherited from a batch, and among batches
/// the lowest batch key wins. A key that ends up in both maps keeps its success.
pub fn unflatten(raw: RawResults, batch_keys: &HashSet<Key>) -> RoundResults {
    let successes = expand(raw.successes, batch_keys);
    let mut failures = expand(raw.failures, batch_keys);
    failures.retain(|k, _| !successes.contains_key(k));
    RoundResults {
        successes,
        failures,
        timestamps: expand(raw.timestamps, batch_keys),
    }
}

fn expand<V: Clone>(map: HashMap<Key, V>, batch_keys: &HashSet<Key>) -> HashMap<Key, V> {
    let mut out = HashMap::with_capacity(map.len());
    let mut batches = Vec::new();
    for (key, value) in map {
        if batch_keys.contains(&key) && key.sub_keys().is_some() {
            batches.push((key, value));
        } else {
            out.insert(key, value);
        }
    }
    batches.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in batches {
        for sub in key.sub_keys().into_iter().flatten() {
            out.entry(sub.clone()).or_insert_with(|| value.clone());
        }
    }
    out
}
