//! In-memory histogram of refresh cycle durations.
//! Records wall time from fetch start to persist end for every cycle that ran.

use std::sync::Mutex;
use std::time::Duration;

/// Shared cycle timing. Pipeline records, API reads.
/// Values stored in milliseconds.
pub struct CycleStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl CycleStats {
    /// Tracks 1ms to 1h, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = (d.as_millis().min(u128::from(u64::MAX)) as u64).max(1);
        if let Ok(mut h) = self.inner.lock() {
            h.saturating_record(ms);
        }
    }

    /// Return (p50_ms, p95_ms, p99_ms). None if no samples.
    pub fn percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        let Ok(h) = self.inner.lock() else {
            return (None, None, None);
        };
        if h.len() == 0 {
            return (None, None, None);
        }
        (
            Some(h.value_at_quantile(0.5)),
            Some(h.value_at_quantile(0.95)),
            Some(h.value_at_quantile(0.99)),
        )
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let stats = CycleStats::new();
        assert_eq!(stats.percentiles(), (None, None, None));
        assert_eq!(stats.len(), 0);
    }

    #[test]
    fn sub_millisecond_cycles_still_count() {
        let stats = CycleStats::new();
        stats.record(Duration::from_micros(200));
        stats.record(Duration::from_millis(1200));
        assert_eq!(stats.len(), 2);
        let (p50, _, p99) = stats.percentiles();
        assert_eq!(p50, Some(1));
        assert!(p99.unwrap() >= 1199);
    }
}
