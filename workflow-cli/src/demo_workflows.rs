//! ABOUTME: Built-in workflows registered at startup so run/resume/cancel/status have something to operate on
//! ABOUTME: greet exercises suspend/resume, flaky-sum exercises retry, search exercises async progress

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use workflow_core::context::Context;
use workflow_core::error::Result;
use workflow_core::graph::{RetryPolicy, StepNode, WorkflowDefinition};
use workflow_core::result::{AsyncRequest, StepFailure, StepResult, SuspendRequest};
use workflow_core::step::Step;
use workflow_core::types::{StepId, TypeTag, TypedValue, WorkflowId};

struct AskName;

#[async_trait]
impl Step for AskName {
    async fn execute(&self, _input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        Ok(StepResult::Suspend(SuspendRequest::new(
            serde_json::json!("What is your name?"),
            "Name",
        )))
    }
}

struct BuildGreeting;

#[async_trait]
impl Step for BuildGreeting {
    async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        let name = input.value.as_str().unwrap_or("there").to_string();
        Ok(StepResult::finish(serde_json::json!(format!("Hello, {name}!"))))
    }
}

/// `run greet <anything>` suspends immediately; `resume <run-id> <name>`
/// completes it with a greeting.
pub fn greet_workflow() -> WorkflowDefinition {
    let ask = StepNode::new(StepId::new("ask-name"), TypeTag::any(), TypeTag::new("Name"), Arc::new(AskName))
        .initial()
        .may_suspend()
        .with_successor(TypeTag::any(), StepId::new("build-greeting"));
    let build = StepNode::new(
        StepId::new("build-greeting"),
        TypeTag::new("Name"),
        TypeTag::any(),
        Arc::new(BuildGreeting),
    );
    WorkflowDefinition::try_new(WorkflowId::new("greet"), "1.0", vec![ask, build])
        .expect("greet demo workflow is statically valid")
}

/// Fails its first two invocations with a transient error, then sums
/// the numbers in its trigger data.
struct FlakySum {
    step_id: StepId,
}

#[async_trait]
impl Step for FlakySum {
    async fn execute(&self, input: TypedValue, ctx: &dyn Context) -> Result<StepResult> {
        let attempt = ctx.step_execution_count(&self.step_id);
        if attempt < 3 {
            return Ok(StepResult::Fail(StepFailure::new(
                format!("transient failure on attempt {attempt}"),
                "IoError",
            )));
        }
        let numbers: Vec<i64> = serde_json::from_value(input.value).unwrap_or_default();
        let total: i64 = numbers.iter().sum();
        Ok(StepResult::finish(serde_json::json!(total)))
    }
}

/// `run flaky-sum '[1,2,3]'` retries twice before finishing with the sum.
pub fn flaky_sum_workflow() -> WorkflowDefinition {
    let step_id = StepId::new("sum");
    let node = StepNode::new(step_id.clone(), TypeTag::any(), TypeTag::any(), Arc::new(FlakySum { step_id }))
        .initial()
        .with_retry_policy(
            RetryPolicy::new(5, Duration::from_millis(20), 2.0)
                .with_max_delay(Duration::from_millis(200))
                .with_retry_on(vec![TypeTag::new("IoError")]),
        );
    WorkflowDefinition::try_new(WorkflowId::new("flaky-sum"), "1.0", vec![node])
        .expect("flaky-sum demo workflow is statically valid")
}

struct StartSearch;

#[async_trait]
impl Step for StartSearch {
    async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        let query = input.value.as_str().unwrap_or("rust").to_string();
        Ok(StepResult::Async(
            AsyncRequest::new(format!("search-{query}"))
                .with_estimated_ms(400)
                .with_args(serde_json::json!({"query": query})),
        ))
    }
}

/// Simulates a long-running lookup: four progress ticks, bailing early
/// if the run is cancelled mid-flight.
struct SearchHandler;

#[async_trait]
impl Step for SearchHandler {
    async fn execute(&self, input: TypedValue, ctx: &dyn Context) -> Result<StepResult> {
        let query = input.value.get("query").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let Some(reporter) = ctx.progress_reporter() else {
            return Ok(StepResult::continue_with(TypedValue::new(
                "SearchResults",
                serde_json::json!({"query": query, "hits": []}),
            )));
        };
        for percent in [25u8, 50, 75, 100] {
            if reporter.is_cancelled() {
                return Ok(StepResult::fail(StepFailure::new("search cancelled", "Cancelled")));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            reporter.update_progress(percent, Some(format!("searched {percent}% of sources")));
        }
        let hits = vec![format!("{query}-result-1"), format!("{query}-result-2")];
        Ok(StepResult::continue_with(TypedValue::new(
            "SearchResults",
            serde_json::json!({"query": query, "hits": hits}),
        )))
    }
}

struct Summarize;

#[async_trait]
impl Step for Summarize {
    async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        Ok(StepResult::finish(input.value))
    }
}

/// `run search rust` schedules an async handler; `status <run-id>` shows
/// its progress until it finishes on its own.
pub fn search_workflow() -> WorkflowDefinition {
    let start = StepNode::new(StepId::new("start-search"), TypeTag::any(), TypeTag::any(), Arc::new(StartSearch))
        .initial()
        .with_successor(TypeTag::any(), StepId::new("summarize"));
    let handler = StepNode::new(
        StepId::new("search-*"),
        TypeTag::any(),
        TypeTag::new("SearchResults"),
        Arc::new(SearchHandler),
    )
    .async_handler();
    let summarize = StepNode::new(StepId::new("summarize"), TypeTag::new("SearchResults"), TypeTag::any(), Arc::new(Summarize));
    WorkflowDefinition::try_new(WorkflowId::new("search"), "1.0", vec![start, handler, summarize])
        .expect("search demo workflow is statically valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_demo_workflows_are_statically_valid() {
        greet_workflow();
        flaky_sum_workflow();
        search_workflow();
    }
}
