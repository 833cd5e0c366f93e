//! ABOUTME: The Step trait executed by the core executor for every graph node

use crate::context::Context;
use crate::error::Result;
use crate::result::StepResult;
use crate::types::TypedValue;
use async_trait::async_trait;
use std::sync::Arc;

/// A unit of work in a workflow graph: one typed input in, one
/// [`StepResult`] out. Implementations must be side-effect-idempotent
/// across a crash/recovery — the engine cannot detect
/// whether a step's side effects completed before a crash.
#[async_trait]
pub trait Step: Send + Sync {
    /// Execute this step. `ctx` exposes the run's context ();
    /// implementations read/write it to communicate with later steps
    /// and with the retry executor.
    async fn execute(&self, input: TypedValue, ctx: &dyn Context) -> Result<StepResult>;
}

pub type BoxedStep = Arc<dyn Step>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryContext;
    use crate::types::RunId;

    struct EchoStep;

    #[async_trait]
    impl Step for EchoStep {
        async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
            Ok(StepResult::Continue(input))
        }
    }

    #[tokio::test]
    async fn echo_step_passes_input_through() {
        let step = EchoStep;
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let input = TypedValue::new("Greeting", serde_json::json!("hi"));
        let result = step.execute(input, &ctx).await.unwrap();
        match result {
            StepResult::Continue(value) => assert_eq!(value.value, serde_json::json!("hi")),
            other => panic!("expected Continue, got {:?}", other),
        }
    }
}
