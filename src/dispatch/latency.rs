use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Sliding window of the most recent request latencies.
///
/// Workers record, the feeder reads. The median is only defined once the
/// window holds `capacity` samples, so early noise never enables bulk mode.
#[derive(Debug)]
pub struct LatencyWindow {
    capacity: usize,
    samples: Mutex<VecDeque<Duration>>,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Duration>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends a sample, evicting the oldest when full.
    pub fn record(&self, latency: Duration) {
        let mut samples = self.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Median of the window, `None` until it is full.
    ///
    /// With an even capacity the two middle samples are averaged.
    pub fn median(&self) -> Option<Duration> {
        let mut sorted: Vec<Duration> = {
            let samples = self.lock();
            if samples.len() < self.capacity {
                return None;
            }
            samples.iter().copied().collect()
        };
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            Some(sorted[mid])
        } else {
            Some((sorted[mid - 1] + sorted[mid]) / 2)
        }
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Samples in arrival order, oldest first.
    pub fn snapshot(&self) -> Vec<Duration> {
        self.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_median_undefined_until_full() {
        let window = LatencyWindow::new(3);
        assert_eq!(window.median(), None);
        window.record(ms(10));
        window.record(ms(20));
        assert!(!window.is_full());
        assert_eq!(window.median(), None);
        window.record(ms(30));
        assert!(window.is_full());
        assert_eq!(window.median(), Some(ms(20)));
    }

    #[test]
    fn test_evicts_oldest() {
        let window = LatencyWindow::new(3);
        for v in [900, 10, 20, 30] {
            window.record(ms(v));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.snapshot(), vec![ms(10), ms(20), ms(30)]);
        assert_eq!(window.median(), Some(ms(20)));
    }

    #[test]
    fn test_even_capacity_averages_middle() {
        let window = LatencyWindow::new(4);
        for v in [40, 10, 30, 20] {
            window.record(ms(v));
        }
        assert_eq!(window.median(), Some(ms(25)));
    }

    #[test]
    fn test_single_outlier_moves_median_little() {
        let window = LatencyWindow::new(15);
        for _ in 0..14 {
            window.record(ms(100));
        }
        window.record(Duration::from_secs(30));
        assert_eq!(window.median(), Some(ms(100)));
    }

    #[test]
    fn test_reset_and_zero_capacity() {
        let window = LatencyWindow::new(0);
        assert_eq!(window.capacity(), 1);
        window.record(ms(5));
        assert_eq!(window.median(), Some(ms(5)));
        window.reset();
        assert!(window.is_empty());
    }

    #[test]
    fn test_concurrent_recording() {
        let window = Arc::new(LatencyWindow::new(15));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let w = Arc::clone(&window);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        w.record(ms(i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(window.is_full());
        assert_eq!(window.len(), 15);
    }
}
