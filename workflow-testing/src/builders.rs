//! ABOUTME: Builder helpers for minimal steps and step nodes used across integration tests

use async_trait::async_trait;
use std::sync::Arc;
use workflow_core::context::Context;
use workflow_core::error::Result;
use workflow_core::result::StepResult;
use workflow_core::step::Step;
use workflow_core::types::TypedValue;

/// A step that passes its input straight through as [`StepResult::Continue`].
pub struct EchoStep;

#[async_trait]
impl Step for EchoStep {
    async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        Ok(StepResult::Continue(input))
    }
}

/// A step backed by a plain closure, for tests that need one-off
/// behavior without declaring a new type.
pub struct FnStep<F>(F)
where
    F: Fn(TypedValue, &dyn Context) -> Result<StepResult> + Send + Sync;

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(TypedValue, &dyn Context) -> Result<StepResult> + Send + Sync,
{
    async fn execute(&self, input: TypedValue, ctx: &dyn Context) -> Result<StepResult> {
        (self.0)(input, ctx)
    }
}

/// Wraps `f` as a [`Step`], boxed the way [`workflow_core::graph::StepNode`] expects.
pub fn fn_step<F>(f: F) -> Arc<dyn Step>
where
    F: Fn(TypedValue, &dyn Context) -> Result<StepResult> + Send + Sync + 'static,
{
    Arc::new(FnStep(f))
}
