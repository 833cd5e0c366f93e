//! ABOUTME: Per-run context: trigger data, step outputs, invocation counters, retry bookkeeping
//! ABOUTME: All operations are concurrency-safe; the core executor never mutates context mid-step

use crate::types::{RunId, StepId, TypeTag, TypedValue};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Surfaced to an async-handler step so it can cooperate with the async
/// coordinator: report incremental progress and check
/// whether the run-level cancellation flag has been raised. A plain
/// [`Step`](crate::step::Step) never sees one of these — only the step
/// the coordinator invokes as the handler for an `Async` result.
pub trait ProgressReporter: Send + Sync {
    fn update_progress(&self, percent: u8, message: Option<String>);
    fn is_cancelled(&self) -> bool;
}

/// One previously-failed attempt, recorded for a step's retry context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub time: DateTime<Utc>,
    pub failure_kind: TypeTag,
    pub failure_message: String,
    pub duration: Duration,
}

/// Per-step retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryContext {
    pub step_id: StepId,
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub first_attempt_time: DateTime<Utc>,
    pub current_attempt_time: DateTime<Utc>,
    pub previous_attempts: Vec<RetryAttempt>,
}

impl RetryContext {
    pub fn first_attempt(step_id: StepId, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            step_id,
            attempt_number: 1,
            max_attempts,
            first_attempt_time: now,
            current_attempt_time: now,
            previous_attempts: Vec::new(),
        }
    }

    /// Record a failed attempt and advance to the next attempt number.
    pub fn record_failure(&mut self, kind: TypeTag, message: String, duration: Duration) {
        self.previous_attempts.push(RetryAttempt {
            attempt_number: self.attempt_number,
            time: self.current_attempt_time,
            failure_kind: kind,
            failure_message: message,
            duration,
        });
        self.attempt_number += 1;
        self.current_attempt_time = Utc::now();
    }

    pub fn is_first_attempt(&self) -> bool {
        self.attempt_number == 1
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }

    pub fn remaining_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_number)
    }

    pub fn total_elapsed(&self) -> chrono::Duration {
        Utc::now() - self.first_attempt_time
    }
}

/// Per-run state: trigger data, step outputs, invocation counters, and
/// retry contexts. Implementations must be safe under concurrent access
/// from interceptors and step handlers.
pub trait Context: Send + Sync {
    fn run_id(&self) -> RunId;
    fn trigger_data(&self) -> serde_json::Value;

    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value);

    fn step_output(&self, step_id: &StepId) -> Option<TypedValue>;
    /// Most recent output, across all steps, whose ancestor chain
    /// contains `tag` — used by branch conditions.
    fn last_output(&self, tag: &TypeTag) -> Option<TypedValue>;
    fn record_step_output(&self, step_id: StepId, value: TypedValue);

    /// Atomically increments and returns the new invocation count.
    fn record_step_execution(&self, step_id: &StepId) -> u32;
    fn step_execution_count(&self, step_id: &StepId) -> u32;

    fn update_retry_context(&self, step_id: &StepId, ctx: RetryContext);
    fn retry_context(&self, step_id: &StepId) -> Option<RetryContext>;
    fn clear_retry_context(&self, step_id: &StepId);
    /// The retry context of the most recently executed step, if any.
    fn current_retry_context(&self) -> Option<RetryContext>;

    /// Marks `step_id` as the one currently executing, so a step calling
    /// `current_retry_context` mid-invocation sees its own retry state.
    /// Called by the core executor immediately before invoking a step.
    fn set_current_step(&self, step_id: StepId);

    /// `Some` only while an async handler is being invoked for this run;
    /// `None` for ordinary step invocation. Default `None` so existing
    /// implementations need no change to stay conforming.
    fn progress_reporter(&self) -> Option<Arc<dyn ProgressReporter>> {
        None
    }
}

/// Default in-process [`Context`] implementation, lock-striped with
/// `DashMap` the way the hook and state-persistence crates in this
/// workspace shard concurrent per-key state.
pub struct InMemoryContext {
    run_id: RunId,
    trigger_data: serde_json::Value,
    values: DashMap<String, serde_json::Value>,
    outputs: DashMap<StepId, TypedValue>,
    output_order: Mutex<Vec<(StepId, TypedValue)>>,
    counters: DashMap<StepId, u32>,
    retry_contexts: DashMap<StepId, RetryContext>,
    current_step: Mutex<Option<StepId>>,
}

impl InMemoryContext {
    pub fn new(run_id: RunId, trigger_data: serde_json::Value) -> Self {
        Self {
            run_id,
            trigger_data,
            values: DashMap::new(),
            outputs: DashMap::new(),
            output_order: Mutex::new(Vec::new()),
            counters: DashMap::new(),
            retry_contexts: DashMap::new(),
            current_step: Mutex::new(None),
        }
    }
}

impl Context for InMemoryContext {
    fn run_id(&self) -> RunId {
        self.run_id
    }

    fn trigger_data(&self) -> serde_json::Value {
        self.trigger_data.clone()
    }

    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: serde_json::Value) {
        self.values.insert(key.to_string(), value);
    }

    fn step_output(&self, step_id: &StepId) -> Option<TypedValue> {
        self.outputs.get(step_id).map(|v| v.clone())
    }

    fn last_output(&self, tag: &TypeTag) -> Option<TypedValue> {
        let order = self.output_order.lock();
        order
            .iter()
            .rev()
            .find(|(_, value)| value.ancestors.contains(tag))
            .map(|(_, value)| value.clone())
    }

    fn record_step_output(&self, step_id: StepId, value: TypedValue) {
        self.outputs.insert(step_id.clone(), value.clone());
        self.output_order.lock().push((step_id, value));
    }

    fn record_step_execution(&self, step_id: &StepId) -> u32 {
        let mut count = self.counters.entry(step_id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    fn step_execution_count(&self, step_id: &StepId) -> u32 {
        self.counters.get(step_id).map(|c| *c).unwrap_or(0)
    }

    fn update_retry_context(&self, step_id: &StepId, ctx: RetryContext) {
        self.retry_contexts.insert(step_id.clone(), ctx);
    }

    fn retry_context(&self, step_id: &StepId) -> Option<RetryContext> {
        self.retry_contexts.get(step_id).map(|c| c.clone())
    }

    fn clear_retry_context(&self, step_id: &StepId) {
        self.retry_contexts.remove(step_id);
    }

    fn current_retry_context(&self) -> Option<RetryContext> {
        let current = self.current_step.lock().clone()?;
        self.retry_context(&current)
    }

    fn set_current_step(&self, step_id: StepId) {
        *self.current_step.lock() = Some(step_id);
    }
}

impl InMemoryContext {
    /// Rebuild a context from a persisted snapshot:
    /// trigger data plus key/value state, step outputs in the order they
    /// were recorded (needed for `last_output`'s "most recent" rule),
    /// and per-step invocation counters. Retry contexts are not part of
    /// a snapshot — every step clears its own before returning a
    /// terminal result, so none survive a suspend boundary.
    pub fn restore(
        run_id: RunId,
        trigger_data: serde_json::Value,
        values: impl IntoIterator<Item = (String, serde_json::Value)>,
        outputs_in_order: impl IntoIterator<Item = (StepId, TypedValue)>,
        counters: impl IntoIterator<Item = (StepId, u32)>,
    ) -> Self {
        let ctx = Self::new(run_id, trigger_data);
        for (key, value) in values {
            ctx.values.insert(key, value);
        }
        for (step_id, value) in outputs_in_order {
            ctx.outputs.insert(step_id.clone(), value.clone());
            ctx.output_order.lock().push((step_id, value));
        }
        for (step_id, count) in counters {
            ctx.counters.insert(step_id, count);
        }
        ctx
    }

    pub fn snapshot_values(&self) -> Vec<(String, serde_json::Value)> {
        self.values.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn snapshot_outputs_in_order(&self) -> Vec<(StepId, TypedValue)> {
        self.output_order.lock().clone()
    }

    pub fn snapshot_counters(&self) -> Vec<(StepId, u32)> {
        self.counters.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_step_execution_is_monotonic_and_atomic_per_step() {
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let step = StepId::new("a");
        assert_eq!(ctx.record_step_execution(&step), 1);
        assert_eq!(ctx.record_step_execution(&step), 2);
        assert_eq!(ctx.step_execution_count(&step), 2);
    }

    #[test]
    fn last_output_matches_by_ancestor_tag() {
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let value = TypedValue::new("UserInput", serde_json::json!({"name": "ada"}))
            .with_supertypes(vec![TypeTag::new("Input")]);
        ctx.record_step_output(StepId::new("a"), value);
        let found = ctx.last_output(&TypeTag::new("Input"));
        assert!(found.is_some());
        assert!(ctx.last_output(&TypeTag::new("Unrelated")).is_none());
    }

    #[test]
    fn retry_context_lifecycle() {
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let step = StepId::new("r");
        ctx.update_retry_context(&step, RetryContext::first_attempt(step.clone(), 3));
        assert!(ctx.retry_context(&step).is_some());
        ctx.clear_retry_context(&step);
        assert!(ctx.retry_context(&step).is_none());
    }

    #[test]
    fn restore_rebuilds_values_outputs_and_counters() {
        let run_id = RunId::new();
        let ctx = InMemoryContext::new(run_id, serde_json::json!({"k": 1}));
        ctx.set("flag", serde_json::json!(true));
        let step = StepId::new("a");
        ctx.record_step_output(step.clone(), TypedValue::new("Out", serde_json::json!(1)));
        ctx.record_step_execution(&step);

        let restored = InMemoryContext::restore(
            run_id,
            ctx.trigger_data(),
            ctx.snapshot_values(),
            ctx.snapshot_outputs_in_order(),
            ctx.snapshot_counters(),
        );

        assert_eq!(restored.get("flag"), Some(serde_json::json!(true)));
        assert_eq!(restored.step_output(&step).unwrap().value, serde_json::json!(1));
        assert_eq!(restored.step_execution_count(&step), 1);
    }

    #[test]
    fn current_retry_context_tracks_most_recently_executed_step() {
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let step = StepId::new("r");
        ctx.update_retry_context(&step, RetryContext::first_attempt(step.clone(), 3));
        ctx.set_current_step(step.clone());
        assert!(ctx.current_retry_context().is_some());
    }
}
