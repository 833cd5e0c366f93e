//! ABOUTME: Context wrapper used to hand an async-handler step a progress reporter
//! ABOUTME: Every other Context method delegates straight through to the run's real context

use std::sync::Arc;
use workflow_core::context::{Context, ProgressReporter, RetryContext};
use workflow_core::types::{RunId, StepId, TypeTag, TypedValue};

/// Wraps a run's [`Context`] for the duration of one async-handler
/// invocation, surfacing `progress_reporter()` without requiring every
/// other `Context` implementation to carry one.
pub struct AsyncExecContext {
    inner: Arc<dyn Context>,
    reporter: Arc<dyn ProgressReporter>,
}

impl AsyncExecContext {
    pub fn new(inner: Arc<dyn Context>, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self { inner, reporter }
    }
}

impl Context for AsyncExecContext {
    fn run_id(&self) -> RunId {
        self.inner.run_id()
    }

    fn trigger_data(&self) -> serde_json::Value {
        self.inner.trigger_data()
    }

    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: serde_json::Value) {
        self.inner.set(key, value);
    }

    fn step_output(&self, step_id: &StepId) -> Option<TypedValue> {
        self.inner.step_output(step_id)
    }

    fn last_output(&self, tag: &TypeTag) -> Option<TypedValue> {
        self.inner.last_output(tag)
    }

    fn record_step_output(&self, step_id: StepId, value: TypedValue) {
        self.inner.record_step_output(step_id, value);
    }

    fn record_step_execution(&self, step_id: &StepId) -> u32 {
        self.inner.record_step_execution(step_id)
    }

    fn step_execution_count(&self, step_id: &StepId) -> u32 {
        self.inner.step_execution_count(step_id)
    }

    fn update_retry_context(&self, step_id: &StepId, ctx: RetryContext) {
        self.inner.update_retry_context(step_id, ctx);
    }

    fn retry_context(&self, step_id: &StepId) -> Option<RetryContext> {
        self.inner.retry_context(step_id)
    }

    fn clear_retry_context(&self, step_id: &StepId) {
        self.inner.clear_retry_context(step_id);
    }

    fn current_retry_context(&self) -> Option<RetryContext> {
        self.inner.current_retry_context()
    }

    fn set_current_step(&self, step_id: StepId) {
        self.inner.set_current_step(step_id);
    }

    fn progress_reporter(&self) -> Option<Arc<dyn ProgressReporter>> {
        Some(self.reporter.clone())
    }
}
