use super::outcome::FailureKind;
use crate::key::{to_key, Key};
use crate::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Facts about one finished round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    pub index: u32,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    pub elapsed: Duration,
}

/// Final outcome of a dispatch run.
///
/// `successes` and `failures` are disjoint. Every submitted argument is in
/// exactly one of `successes`, `failures` or `pending`; `pending` is only
/// non-empty when the run was cancelled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub successes: HashMap<Key, Value>,
    pub failures: HashMap<Key, FailureKind>,
    /// Dispatch time per argument, present when `verbose` is set.
    pub timestamps: Option<HashMap<Key, SystemTime>>,
    /// Arguments never handed to the requester, in submission order.
    pub pending: Vec<Value>,
    pub rounds: Vec<RoundSummary>,
    pub cancelled: bool,
}

impl DispatchReport {
    /// Response for `arg`, if it succeeded.
    pub fn success(&self, arg: &Value) -> Option<&Value> {
        to_key(arg).ok().and_then(|k| self.successes.get(&k))
    }

    /// Failure for `arg`, if it failed in the last round that covered it.
    pub fn failure(&self, arg: &Value) -> Option<&FailureKind> {
        to_key(arg).ok().and_then(|k| self.failures.get(&k))
    }

    /// True when every argument succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.pending.is_empty()
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// JSON document of the report, entries sorted by key.
    pub fn to_json(&self) -> Result<Value> {
        let mut successes: Vec<_> = self.successes.iter().collect();
        successes.sort_by(|a, b| a.0.cmp(b.0));
        let mut failures: Vec<_> = self.failures.iter().collect();
        failures.sort_by(|a, b| a.0.cmp(b.0));

        let doc = ReportDocument {
            cancelled: self.cancelled,
            rounds: self
                .rounds
                .iter()
                .map(|r| RoundEntry {
                    index: r.index,
                    dispatched: r.dispatched,
                    succeeded: r.succeeded,
                    failed: r.failed,
                    pending: r.pending,
                    elapsed_secs: r.elapsed.as_secs_f64(),
                })
                .collect(),
            successes: successes
                .into_iter()
                .map(|(k, v)| SuccessEntry {
                    argument: k.to_argument(),
                    response: v,
                })
                .collect(),
            failures: failures
                .into_iter()
                .map(|(k, f)| FailureEntry {
                    argument: k.to_argument(),
                    message: f.to_string(),
                    failure: f,
                })
                .collect(),
            timestamps: self.timestamps.as_ref().map(|ts| {
                let mut entries: Vec<_> = ts.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                entries
                    .into_iter()
                    .map(|(k, at)| TimestampEntry {
                        argument: k.to_argument(),
                        dispatched_at: epoch_secs(*at),
                    })
                    .collect()
            }),
            pending: &self.pending,
        };
        Ok(serde_json::to_value(doc)?)
    }

    /// Writes [`to_json`](Self::to_json) to `path`, replacing the file.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let doc = self.to_json()?;
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, &doc)?;
        writer.flush()?;
        Ok(())
    }
}

fn epoch_secs(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    cancelled: bool,
    rounds: Vec<RoundEntry>,
    successes: Vec<SuccessEntry<'a>>,
    failures: Vec<FailureEntry<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamps: Option<Vec<TimestampEntry>>,
    pending: &'a [Value],
}

#[derive(Serialize)]
struct RoundEntry {
    index: u32,
    dispatched: usize,
    succeeded: usize,
    failed: usize,
    pending: usize,
    elapsed_secs: f64,
}

#[derive(Serialize)]
struct SuccessEntry<'a> {
    argument: Value,
    response: &'a Value,
}

#[derive(Serialize)]
struct FailureEntry<'a> {
    argument: Value,
    failure: &'a FailureKind,
    message: String,
}

#[derive(Serialize)]
struct TimestampEntry {
    argument: Value,
    dispatched_at: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DispatchReport {
        let mut report = DispatchReport::default();
        report.successes.insert(Key::Int(2), json!({"v": 2}));
        report.successes.insert(Key::Int(1), json!({"v": 1}));
        report
            .failures
            .insert(Key::Str("x".into()), FailureKind::RemoteError { status: 503 });
        report.rounds.push(RoundSummary {
            index: 1,
            dispatched: 3,
            succeeded: 2,
            failed: 1,
            pending: 0,
            elapsed: Duration::from_millis(1500),
        });
        report
    }

    #[test]
    fn test_lookup_by_argument() {
        let report = sample();
        assert_eq!(report.success(&json!(1)), Some(&json!({"v": 1})));
        assert_eq!(
            report.failure(&json!("x")),
            Some(&FailureKind::RemoteError { status: 503 })
        );
        assert_eq!(report.success(&json!({"obj": 1})), None);
        assert!(!report.is_complete());
        assert_eq!(report.round_count(), 1);
    }

    #[test]
    fn test_json_document() {
        let doc = sample().to_json().unwrap();
        assert_eq!(doc["cancelled"], json!(false));
        assert_eq!(doc["successes"][0]["argument"], json!(1));
        assert_eq!(doc["successes"][1]["response"], json!({"v": 2}));
        assert_eq!(doc["failures"][0]["argument"], json!("x"));
        assert_eq!(doc["failures"][0]["failure"]["status"], json!(503));
        assert_eq!(doc["failures"][0]["message"], json!("failed with code 503"));
        assert_eq!(doc["rounds"][0]["elapsed_secs"], json!(1.5));
        assert!(doc.get("timestamps").is_none());
        assert_eq!(doc["pending"], json!([]));
    }

    #[test]
    fn test_verbose_timestamps() {
        let mut report = sample();
        let mut timestamps = HashMap::new();
        timestamps.insert(Key::Int(1), UNIX_EPOCH + Duration::from_secs(10));
        report.timestamps = Some(timestamps);
        let doc = report.to_json().unwrap();
        assert_eq!(doc["timestamps"][0]["argument"], json!(1));
        assert_eq!(doc["timestamps"][0]["dispatched_at"], json!(10.0));
    }

    #[test]
    fn test_write_json() {
        let path = std::env::temp_dir().join(format!(
            "paced-dispatch-report-{}.json",
            uuid::Uuid::new_v4()
        ));
        sample().write_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["successes"].as_array().map(Vec::len), Some(2));
        std::fs::remove_file(&path).unwrap();
    }
}
