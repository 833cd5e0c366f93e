//! ABOUTME: Per-step and global retry metrics
//! ABOUTME: Counters are DashMap-sharded so concurrent runs never contend on a single lock

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use workflow_core::types::{StepId, TypeTag};

/// Snapshot of one step's retry counters, safe to serialize for a
/// `metrics` CLI subcommand or a status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepRetryMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub failures_by_kind: std::collections::BTreeMap<String, u64>,
    pub exhaustions: u64,
    pub cumulative_retry_delay_ms: u64,
    pub cumulative_duration_ms: u64,
    pub max_attempts_observed: u32,
}

impl StepRetryMetrics {
    /// `successes / (successes + exhaustions)`; returns `None` (treated
    /// as "undefined") when the denominator is zero.
    pub fn success_rate(&self) -> Option<f64> {
        let denom = self.successes + self.exhaustions;
        if denom == 0 {
            None
        } else {
            Some(self.successes as f64 / denom as f64)
        }
    }
}

#[derive(Default)]
struct StepCounters {
    attempts: AtomicU64,
    successes: AtomicU64,
    exhaustions: AtomicU64,
    cumulative_retry_delay_ms: AtomicU64,
    cumulative_duration_ms: AtomicU64,
    max_attempts_observed: AtomicU64,
    failures_by_kind: DashMap<String, AtomicU64>,
}

impl StepCounters {
    fn snapshot(&self) -> StepRetryMetrics {
        StepRetryMetrics {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures_by_kind: self
                .failures_by_kind
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
            exhaustions: self.exhaustions.load(Ordering::Relaxed),
            cumulative_retry_delay_ms: self.cumulative_retry_delay_ms.load(Ordering::Relaxed),
            cumulative_duration_ms: self.cumulative_duration_ms.load(Ordering::Relaxed),
            max_attempts_observed: self.max_attempts_observed.load(Ordering::Relaxed) as u32,
        }
    }
}

/// Process-wide retry metrics registry. One instance is shared by every
/// run of every workflow in the engine.
#[derive(Default)]
pub struct RetryMetricsRegistry {
    per_step: DashMap<StepId, StepCounters>,
}

impl RetryMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, step_id: &StepId) -> dashmap::mapref::one::Ref<'_, StepId, StepCounters> {
        self.per_step.entry(step_id.clone()).or_default();
        self.per_step.get(step_id).expect("just inserted")
    }

    pub fn record_attempt(&self, step_id: &StepId, attempt_number: u32) {
        let counters = self.counters(step_id);
        counters.attempts.fetch_add(1, Ordering::Relaxed);
        counters
            .max_attempts_observed
            .fetch_max(attempt_number as u64, Ordering::Relaxed);
    }

    pub fn record_success(&self, step_id: &StepId, duration: Duration) {
        let counters = self.counters(step_id);
        counters.successes.fetch_add(1, Ordering::Relaxed);
        counters
            .cumulative_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, step_id: &StepId, kind: &TypeTag, duration: Duration) {
        let counters = self.counters(step_id);
        counters
            .failures_by_kind
            .entry(kind.as_str().to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        counters
            .cumulative_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_exhaustion(&self, step_id: &StepId) {
        self.counters(step_id).exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delay(&self, step_id: &StepId, delay: Duration) {
        self.counters(step_id)
            .cumulative_retry_delay_ms
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn step_metrics(&self, step_id: &StepId) -> StepRetryMetrics {
        self.per_step
            .get(step_id)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Sums every step's counters into one roll-up.
    pub fn global_metrics(&self) -> StepRetryMetrics {
        let mut total = StepRetryMetrics::default();
        for entry in self.per_step.iter() {
            let snap = entry.value().snapshot();
            total.attempts += snap.attempts;
            total.successes += snap.successes;
            total.exhaustions += snap.exhaustions;
            total.cumulative_retry_delay_ms += snap.cumulative_retry_delay_ms;
            total.cumulative_duration_ms += snap.cumulative_duration_ms;
            total.max_attempts_observed = total.max_attempts_observed.max(snap.max_attempts_observed);
            for (kind, count) in snap.failures_by_kind {
                *total.failures_by_kind.entry(kind).or_insert(0) += count;
            }
        }
        total
    }

    pub fn reset_step(&self, step_id: &StepId) {
        self.per_step.remove(step_id);
    }

    pub fn reset_all(&self) {
        self.per_step.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_undefined_with_no_terminal_outcomes() {
        let metrics = StepRetryMetrics::default();
        assert_eq!(metrics.success_rate(), None);
    }

    #[test]
    fn success_rate_divides_successes_by_successes_plus_exhaustions() {
        let registry = RetryMetricsRegistry::new();
        let step = StepId::new("s");
        registry.record_success(&step, Duration::from_millis(5));
        registry.record_exhaustion(&step);
        let snap = registry.step_metrics(&step);
        assert_eq!(snap.success_rate(), Some(0.5));
    }

    #[test]
    fn reset_step_clears_only_that_step() {
        let registry = RetryMetricsRegistry::new();
        let a = StepId::new("a");
        let b = StepId::new("b");
        registry.record_attempt(&a, 1);
        registry.record_attempt(&b, 1);
        registry.reset_step(&a);
        assert_eq!(registry.step_metrics(&a).attempts, 0);
        assert_eq!(registry.step_metrics(&b).attempts, 1);
    }

    #[test]
    fn global_metrics_sums_across_steps() {
        let registry = RetryMetricsRegistry::new();
        registry.record_attempt(&StepId::new("a"), 1);
        registry.record_attempt(&StepId::new("b"), 1);
        assert_eq!(registry.global_metrics().attempts, 2);
    }
}
