//! ABOUTME: Integration tests for the core executor driving runs end to end
//! ABOUTME: Covers the happy path, retry, suspend/resume, async, invocation limits, and cancellation

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use workflow_core::context::Context;
use workflow_core::error::Result;
use workflow_core::graph::{OnLimitBehavior, RetryPolicy, StepNode, WorkflowDefinition};
use workflow_core::result::{AsyncRequest, StepFailure, StepResult, SuspendRequest};
use workflow_core::step::Step;
use workflow_core::types::{RunId, StepId, TypeTag, TypedValue, WorkflowId};
use workflow_engine::async_coordinator::AsyncCoordinator;
use workflow_engine::executor::{CoreExecutor, ExecutionOutcome};
use workflow_engine::metrics::RetryMetricsRegistry;
use workflow_engine::retry::{RetryExecutor, TokioSleeper};
use workflow_engine::suspension::SuspensionManager;
use workflow_events::bus::EventBus;
use workflow_hooks::chain::InterceptorChain;
use workflow_state::instance::InstanceStatus;
use workflow_state::store::{InMemoryInstanceStore, InstanceStore};

struct Finisher;
#[async_trait]
impl Step for Finisher {
    async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        Ok(StepResult::Finish(input.value))
    }
}

struct FailsOnce {
    failed: AtomicBool,
}
#[async_trait]
impl Step for FailsOnce {
    async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            Ok(StepResult::Fail(StepFailure::new("transient", "IoError")))
        } else {
            Ok(StepResult::Continue(input))
        }
    }
}

struct Suspender;
#[async_trait]
impl Step for Suspender {
    async fn execute(&self, _input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        Ok(StepResult::Suspend(SuspendRequest::new(serde_json::json!("pick"), "Choice")))
    }
}

struct AsyncStarter;
#[async_trait]
impl Step for AsyncStarter {
    async fn execute(&self, _input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        Ok(StepResult::Async(AsyncRequest::new("search-1").with_args(serde_json::json!({"q": "rust"}))))
    }
}

struct EchoHandler;
#[async_trait]
impl Step for EchoHandler {
    async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        Ok(StepResult::Continue(input))
    }
}

struct LoopsOnce;
#[async_trait]
impl Step for LoopsOnce {
    async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
        Ok(StepResult::Continue(input))
    }
}

struct SpinsUntilCancelled;
#[async_trait]
impl Step for SpinsUntilCancelled {
    async fn execute(&self, _input: TypedValue, ctx: &dyn Context) -> Result<StepResult> {
        let reporter = ctx.progress_reporter().expect("async handlers always see a progress reporter");
        loop {
            if reporter.is_cancelled() {
                return Ok(StepResult::Fail(StepFailure::new("cancelled", "Cancelled")));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn make_executor() -> (CoreExecutor, Arc<dyn InstanceStore>) {
    let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
    let interceptors = Arc::new(InterceptorChain::new());
    let events = Arc::new(EventBus::new());
    let metrics = Arc::new(RetryMetricsRegistry::new());
    let retry_executor = Arc::new(RetryExecutor::new(metrics, Arc::new(TokioSleeper)));
    let suspension = Arc::new(SuspensionManager::new(store.clone()));
    let async_coordinator = Arc::new(AsyncCoordinator::new(store.clone(), events.clone(), Duration::from_millis(0)));
    let executor = CoreExecutor::new(store.clone(), interceptors, events, retry_executor, suspension, async_coordinator);
    (executor, store)
}

// S1: a one-step workflow that finishes immediately.
#[tokio::test]
async fn happy_path_finishes_in_one_step() {
    let (executor, store) = make_executor();
    let node = StepNode::new(StepId::new("a"), TypeTag::any(), TypeTag::any(), Arc::new(Finisher)).initial();
    let def = Arc::new(WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", vec![node]).unwrap());

    let run_id = RunId::new();
    let outcome = executor.start(def, run_id, serde_json::json!("hi")).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Finished(v) if v == serde_json::json!("hi")));
    let instance = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(instance.header.status, InstanceStatus::Completed);
    assert_eq!(instance.history.len(), 1);
}

// S2: a step that fails once under a retry policy still completes the run,
// and the history records the attempt the success actually happened on.
#[tokio::test]
async fn retry_then_success_completes_the_run() {
    let (executor, store) = make_executor();
    let step = Arc::new(FailsOnce {
        failed: AtomicBool::new(false),
    });
    let node = StepNode::new(StepId::new("a"), TypeTag::any(), TypeTag::any(), step)
        .initial()
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1), 1.0))
        .with_successor(TypeTag::any(), StepId::new("b"));
    let finish = StepNode::new(StepId::new("b"), TypeTag::any(), TypeTag::any(), Arc::new(Finisher));
    let def = Arc::new(WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", vec![node, finish]).unwrap());

    let run_id = RunId::new();
    let outcome = executor.start(def, run_id, serde_json::json!(1)).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Finished(_)));
    let instance = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(instance.header.status, InstanceStatus::Completed);
    let record_a = instance.history.iter().find(|r| r.step_id == StepId::new("a")).unwrap();
    assert_eq!(record_a.attempt, 2, "the step failed once before succeeding on its second attempt");
}

// S3: exhausting the retry policy fails the whole run.
#[tokio::test]
async fn retry_exhaustion_fails_the_run() {
    let (executor, store) = make_executor();
    let step = Arc::new(FailsOnce {
        failed: AtomicBool::new(false),
    });
    // always fails: retry policy with max_attempts 1 means immediate exhaustion after one failure
    let node = StepNode::new(StepId::new("a"), TypeTag::any(), TypeTag::any(), step)
        .initial()
        .with_retry_policy(RetryPolicy::new(1, Duration::from_millis(1), 1.0));
    let def = Arc::new(WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", vec![node]).unwrap());

    let run_id = RunId::new();
    let outcome = executor.start(def, run_id, serde_json::json!(1)).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failed(_)));
    let instance = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(instance.header.status, InstanceStatus::Failed);
    assert!(instance.header.error_info.is_some());
}

// S4: a suspending step pauses the run; resuming it reaches the declared successor.
#[tokio::test]
async fn suspend_then_resume_reaches_the_declared_successor() {
    let (executor, store) = make_executor();
    let ask = StepNode::new(StepId::new("ask"), TypeTag::any(), TypeTag::any(), Arc::new(Suspender))
        .initial()
        .with_successor(TypeTag::any(), StepId::new("finish"));
    let finish = StepNode::new(StepId::new("finish"), TypeTag::any(), TypeTag::any(), Arc::new(Finisher));
    let def = Arc::new(WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", vec![ask, finish]).unwrap());

    let run_id = RunId::new();
    let outcome = executor.start(def.clone(), run_id, serde_json::json!(null)).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Suspended));
    let instance = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(instance.header.status, InstanceStatus::Suspended);

    let value = TypedValue::new("Choice", serde_json::json!("yes"));
    let outcome = executor.resume(def, run_id, value).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Finished(v) if v == serde_json::json!("yes")));
}

// S5: an async handler's result routes from the step that scheduled it.
#[tokio::test]
async fn async_handler_result_routes_from_the_originating_step() {
    let (executor, store) = make_executor();
    let starter = StepNode::new(StepId::new("search"), TypeTag::any(), TypeTag::any(), Arc::new(AsyncStarter))
        .initial()
        .with_successor(TypeTag::any(), StepId::new("done"));
    let handler = StepNode::new(StepId::new("search-*"), TypeTag::any(), TypeTag::any(), Arc::new(EchoHandler)).async_handler();
    let done = StepNode::new(StepId::new("done"), TypeTag::any(), TypeTag::any(), Arc::new(Finisher));
    let def = Arc::new(WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", vec![starter, handler, done]).unwrap());

    let run_id = RunId::new();
    let outcome = executor.start(def, run_id, serde_json::json!(null)).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Finished(_)));
    let instance = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(instance.header.status, InstanceStatus::Completed);
    assert_eq!(instance.async_tasks.len(), 1);
}

// S6 (invocation limit): a step that loops back to itself trips the
// declared limit on its second visit and fails the run.
#[tokio::test]
async fn invocation_limit_error_fails_the_run_on_its_second_visit() {
    let (executor, store) = make_executor();
    let node = StepNode::new(StepId::new("a"), TypeTag::any(), TypeTag::any(), Arc::new(LoopsOnce))
        .initial()
        .may_suspend()
        .with_invocation_limit(1, OnLimitBehavior::Error)
        .with_successor(TypeTag::any(), StepId::new("a"));
    let def = Arc::new(WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", vec![node]).unwrap());

    let run_id = RunId::new();
    let outcome = executor.start(def, run_id, serde_json::json!(1)).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failed(_)));
    let instance = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(instance.header.status, InstanceStatus::Failed);
}

// Cancellation: a forceful cancel_async_operation call wins over
// whatever the in-flight handler was about to return.
#[tokio::test]
async fn cancel_async_operation_forces_the_run_to_cancelled_not_failed() {
    let (executor, store) = make_executor();
    let executor = Arc::new(executor);
    let starter = StepNode::new(StepId::new("search"), TypeTag::any(), TypeTag::any(), Arc::new(AsyncStarter))
        .initial()
        .with_successor(TypeTag::any(), StepId::new("done"));
    let handler =
        StepNode::new(StepId::new("search-*"), TypeTag::any(), TypeTag::any(), Arc::new(SpinsUntilCancelled)).async_handler();
    let done = StepNode::new(StepId::new("done"), TypeTag::any(), TypeTag::any(), Arc::new(Finisher));
    let def = Arc::new(WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", vec![starter, handler, done]).unwrap());

    let run_id = RunId::new();
    let run_task = {
        let executor = executor.clone();
        let def = def.clone();
        tokio::spawn(async move { executor.start(def, run_id, serde_json::json!(null)).await })
    };

    // Give the handler a moment to start spinning on `is_cancelled()`
    // before we ask it to stop.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(executor.cancel_async(run_id), "a handler should be in flight to cancel");

    let outcome = run_task.await.unwrap().unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Cancelled));
    let instance = store.load(run_id).await.unwrap().unwrap();
    assert_eq!(instance.header.status, InstanceStatus::Cancelled);
}
