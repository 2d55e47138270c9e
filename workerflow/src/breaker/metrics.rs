//! Lifetime counters for a breaker.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Totals accumulated since the breaker was created. Never reset.
#[derive(Debug, Default)]
pub struct BreakerMetrics {
    admitted: AtomicU64,
    rejected: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    transitions: AtomicU64,
}

/// Point-in-time copy of [`BreakerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Calls admitted by `check_before_call`.
    pub admitted: u64,
    /// Calls rejected with `CircuitOpen`.
    pub rejected: u64,
    /// Recorded successes.
    pub successes: u64,
    /// Recorded failures.
    pub failures: u64,
    /// Mode changes, including administrative resets.
    pub transitions: u64,
}

impl BreakerMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
        }
    }

    /// Fraction of settled calls that failed, or 0 when nothing settled yet.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let snapshot = self.snapshot();
        let settled = snapshot.successes + snapshot.failures;
        if settled == 0 {
            0.0
        } else {
            snapshot.failures as f64 / settled as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = BreakerMetrics::new();
        metrics.record_admitted();
        metrics.record_admitted();
        metrics.record_success();
        metrics.record_failure();
        metrics.record_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.admitted, 2);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.failures, 1);
        assert!((metrics.failure_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_rate_empty() {
        assert_eq!(BreakerMetrics::new().failure_rate(), 0.0);
    }
}
