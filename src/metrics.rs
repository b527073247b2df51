//! Metrics for validation and deployment runs
//!
//! Orchestrators receive a [`MetricsSink`] at construction; nothing is
//! recorded through global state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Receiver of lifecycle events. Every method defaults to a no-op.
pub trait MetricsSink: Send + Sync {
    /// A validation run finished
    fn validation_finished(&self, _success: bool, _elapsed: Duration) {}

    /// One validation step finished
    fn validation_step(&self, _step: &str, _success: bool, _elapsed: Duration) {}

    /// One remote deploy attempt finished
    fn deploy_attempt(&self, _attempt: u32, _success: bool) {}

    /// A deploy was refused because sources changed since validation
    fn checksum_mismatch(&self) {}

    /// A deployment finished
    fn deploy_finished(&self, _success: bool, _elapsed: Duration) {}
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Keeps counters in memory; useful in tests and for end-of-run summaries
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    pub validations_passed: Counter,
    pub validations_failed: Counter,
    pub validation_steps: Counter,
    pub validation_time_ms: Counter,
    pub deploy_attempts: Counter,
    pub deploy_attempts_failed: Counter,
    pub checksum_mismatches: Counter,
    pub deploys_succeeded: Counter,
    pub deploys_failed: Counter,
    pub deploy_time_ms: Counter,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            validations_passed: self.validations_passed.get(),
            validations_failed: self.validations_failed.get(),
            validation_steps: self.validation_steps.get(),
            deploy_attempts: self.deploy_attempts.get(),
            deploy_attempts_failed: self.deploy_attempts_failed.get(),
            checksum_mismatches: self.checksum_mismatches.get(),
            deploys_succeeded: self.deploys_succeeded.get(),
            deploys_failed: self.deploys_failed.get(),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn validation_finished(&self, success: bool, elapsed: Duration) {
        if success {
            self.validations_passed.inc();
        } else {
            self.validations_failed.inc();
        }
        self.validation_time_ms.add(elapsed.as_millis() as u64);
    }

    fn validation_step(&self, _step: &str, _success: bool, _elapsed: Duration) {
        self.validation_steps.inc();
    }

    fn deploy_attempt(&self, _attempt: u32, success: bool) {
        self.deploy_attempts.inc();
        if !success {
            self.deploy_attempts_failed.inc();
        }
    }

    fn checksum_mismatch(&self) {
        self.checksum_mismatches.inc();
    }

    fn deploy_finished(&self, success: bool, elapsed: Duration) {
        if success {
            self.deploys_succeeded.inc();
        } else {
            self.deploys_failed.inc();
        }
        self.deploy_time_ms.add(elapsed.as_millis() as u64);
    }
}

/// Point-in-time counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub validations_passed: u64,
    pub validations_failed: u64,
    pub validation_steps: u64,
    pub deploy_attempts: u64,
    pub deploy_attempts_failed: u64,
    pub checksum_mismatches: u64,
    pub deploys_succeeded: u64,
    pub deploys_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_counts() {
        let metrics = InMemoryMetrics::new();
        metrics.validation_finished(true, Duration::from_millis(40));
        metrics.validation_finished(false, Duration::from_millis(2));
        metrics.deploy_attempt(1, false);
        metrics.deploy_attempt(2, true);
        metrics.checksum_mismatch();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.validations_passed, 1);
        assert_eq!(snapshot.validations_failed, 1);
        assert_eq!(snapshot.deploy_attempts, 2);
        assert_eq!(snapshot.deploy_attempts_failed, 1);
        assert_eq!(snapshot.checksum_mismatches, 1);
        assert_eq!(metrics.validation_time_ms.get(), 42);
    }

    #[test]
    fn test_noop_accepts_everything() {
        let sink: &dyn MetricsSink = &NoopMetrics;
        sink.validation_finished(true, Duration::ZERO);
        sink.deploy_finished(false, Duration::ZERO);
    }
}
