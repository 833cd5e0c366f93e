//! ABOUTME: The Interceptor trait — before/after/error hooks wrapped around step execution

use async_trait::async_trait;
use workflow_core::error::Result;
use workflow_core::result::StepResult;
use workflow_core::types::{RunId, StepId, TypedValue};

/// A component receiving before/after/error hooks around step execution,
/// optionally replacing the step's result. Interceptors
/// must be side-effect-safe: long or blocking work belongs in async
/// handlers, never in a hook.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Runs before step invocation. A `Some` return short-circuits the
    /// step — its executor is never invoked and this becomes the result.
    async fn before_step(
        &self,
        _run_id: RunId,
        _step_id: &StepId,
        _input: &TypedValue,
    ) -> Result<Option<StepResult>> {
        Ok(None)
    }

    async fn after_step(&self, _run_id: RunId, _step_id: &StepId, _result: &StepResult) -> Result<()> {
        Ok(())
    }

    async fn on_step_error(
        &self,
        _run_id: RunId,
        _step_id: &StepId,
        _error: &workflow_core::error::EngineError,
    ) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;

    /// A critical interceptor that errors fails the run; a non-critical
    /// one only logs and continues.
    fn is_critical(&self) -> bool {
        false
    }
}
