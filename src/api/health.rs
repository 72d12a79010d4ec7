//! Shared refresh health for the /health endpoint.
//! Updated by the refresh pipeline after every cycle.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::types::CycleResult;

/// Refresh counters. Written by the pipeline, read by the API.
#[derive(Default)]
pub struct RefreshHealth {
    /// Cycles that ran to an outcome (skipped ticks excluded).
    pub cycles_total: AtomicU64,
    /// Failed cycles since the last success.
    pub consecutive_failures: AtomicU64,
    /// Unix milliseconds of the last successful cycle (0 = none).
    pub last_success_at_ms: AtomicI64,
    last_outcome: Mutex<Option<String>>,
}

impl RefreshHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: &CycleResult, at_ms: i64) {
        if matches!(result, CycleResult::Skipped) {
            return;
        }
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        if result.is_success() {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.last_success_at_ms.store(at_ms, Ordering::Relaxed);
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut last) = self.last_outcome.lock() {
            *last = Some(result.to_string());
        }
    }

    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn last_success_at_ms(&self) -> i64 {
        self.last_success_at_ms.load(Ordering::Relaxed)
    }

    pub fn last_outcome(&self) -> Option<String> {
        self.last_outcome.lock().ok().and_then(|l| l.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_until_a_success() {
        let health = RefreshHealth::new();
        health.record(&CycleResult::FetchFailed("timeout".to_string()), 1);
        health.record(
            &CycleResult::PersistFailed {
                cached: 3,
                reason: "locked".to_string(),
            },
            2,
        );
        assert_eq!(health.consecutive_failures(), 2);
        assert_eq!(health.last_outcome().as_deref(), Some("persist_failed"));

        health.record(&CycleResult::Success(3), 3);
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.last_success_at_ms(), 3);
        assert_eq!(health.cycles_total(), 3);
    }

    #[test]
    fn skipped_ticks_are_not_counted() {
        let health = RefreshHealth::new();
        health.record(&CycleResult::Skipped, 1);
        assert_eq!(health.cycles_total(), 0);
        assert!(health.last_outcome().is_none());
    }
}
