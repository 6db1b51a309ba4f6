use super::shutdown::ShutdownState;
use std::time::Duration;

/// Point-in-time facts about a running round.
///
/// Facts only: no thresholds are applied and nothing here drives behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSignals {
    pub round: u32,
    pub state: ShutdownState,
    pub queue_len: usize,
    pub queue_capacity: usize,
    /// Size the feeder chose for its most recent batch.
    pub batch_size: usize,
    pub latency_samples: usize,
    /// `None` until the latency window is full.
    pub latency_median: Option<Duration>,
    /// Entries written to the result store (a bulk batch counts once).
    pub completed: usize,
    pub workers: usize,
}

impl DispatchSignals {
    pub fn queue_utilization(&self) -> f64 {
        if self.queue_capacity == 0 {
            return 0.0;
        }
        self.queue_len as f64 / self.queue_capacity as f64
    }

    pub fn is_bulk(&self) -> bool {
        self.batch_size > 1
    }
}
