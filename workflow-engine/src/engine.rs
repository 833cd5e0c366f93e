//! ABOUTME: Top-level façade wiring registry, executor, events, and interceptors into one engine
//! ABOUTME: Owns the run-lifecycle bookkeeping shutdown needs to drain in-flight work gracefully

use crate::async_coordinator::AsyncCoordinator;
use crate::config::EngineConfig;
use crate::executor::{CoreExecutor, ExecutionOutcome};
use crate::handle::ExecutionHandle;
use crate::metrics::RetryMetricsRegistry;
use crate::registry::WorkflowRegistry;
use crate::retry::{RetryExecutor, TokioSleeper};
use crate::suspension::SuspensionManager;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};
use workflow_core::error::{EngineError, Result};
use workflow_core::graph::WorkflowDefinition;
use workflow_core::types::{RunId, StepId, TypedValue, WorkflowId};
use workflow_events::bus::EventBus;
use workflow_events::listener::Listener;
use workflow_hooks::chain::InterceptorChain;
use workflow_hooks::traits::Interceptor;
use workflow_state::instance::{AsyncTaskStatus, InstanceStatus, WorkflowInstance};
use workflow_state::store::{InstanceFilter, InstanceStore, Page};

/// The latest externally-observable event for a run, read from whatever
/// was last persisted (open question: `getCurrentResult` "returns the
/// latest persisted snapshot; it never blocks for a fresher value").
/// One of a `Continue` step output, a terminal `Finish` value, an
/// in-flight async handler's progress, a suspend prompt, or a
/// terminated (failed/cancelled) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RunStatus {
    /// The run is still advancing; `value` is the most recent step
    /// output recorded so far, if any has landed yet.
    Continue {
        step_id: Option<StepId>,
        value: Option<serde_json::Value>,
    },
    /// The run finished; `value` is its terminal result.
    Finish { value: serde_json::Value },
    /// An async handler is in flight for this run.
    AsyncProgress {
        task_id: String,
        percent_complete: u8,
        properties: std::collections::BTreeMap<String, serde_json::Value>,
        completed: bool,
    },
    /// The run is paused awaiting a resume value.
    Suspended {
        prompt: serde_json::Value,
        metadata: std::collections::BTreeMap<String, serde_json::Value>,
    },
    /// The run failed or was forcefully cancelled.
    Terminated {
        status: InstanceStatus,
        error_info: Option<String>,
    },
}

impl From<&WorkflowInstance> for RunStatus {
    fn from(instance: &WorkflowInstance) -> Self {
        if let Some(suspension) = &instance.suspension {
            return Self::Suspended {
                prompt: suspension.prompt.clone(),
                metadata: suspension.metadata.clone(),
            };
        }

        if instance.header.status == InstanceStatus::Suspended {
            let pending_task = instance
                .async_tasks
                .iter()
                .rev()
                .find(|task| matches!(task.status, AsyncTaskStatus::Pending | AsyncTaskStatus::Running));
            if let Some(task) = pending_task {
                let mut properties = std::collections::BTreeMap::new();
                if let Some(message) = &task.message {
                    properties.insert("message".to_string(), serde_json::Value::String(message.clone()));
                }
                return Self::AsyncProgress {
                    task_id: task.task_id.clone(),
                    percent_complete: task.percent_complete,
                    properties,
                    completed: false,
                };
            }
        }

        match instance.header.status {
            InstanceStatus::Completed => Self::Finish {
                value: instance.header.result_value.clone().unwrap_or(serde_json::Value::Null),
            },
            InstanceStatus::Failed | InstanceStatus::Cancelled => Self::Terminated {
                status: instance.header.status,
                error_info: instance.header.error_info.clone(),
            },
            InstanceStatus::Running | InstanceStatus::Suspended => Self::Continue {
                step_id: instance.header.current_step_id.clone(),
                value: last_output_value(instance),
            },
        }
    }
}

fn last_output_value(instance: &WorkflowInstance) -> Option<serde_json::Value> {
    let step_id = instance.context.output_order.last()?;
    instance.context.outputs.get(step_id).map(|typed| typed.value.clone())
}

/// The engine façade: register workflows, start and
/// resume runs, inspect their state, and shut down gracefully. One
/// `Engine` is meant to be shared process-wide behind an `Arc`.
pub struct Engine {
    registry: Arc<WorkflowRegistry>,
    store: Arc<dyn InstanceStore>,
    events: Arc<EventBus>,
    interceptors: Arc<InterceptorChain>,
    executor: Arc<CoreExecutor>,
    metrics: Arc<RetryMetricsRegistry>,
    config: EngineConfig,
    shutting_down: Arc<AtomicBool>,
    inflight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<dyn InstanceStore>) -> Self {
        let events = Arc::new(EventBus::new());
        let interceptors = Arc::new(InterceptorChain::new());
        let metrics = Arc::new(RetryMetricsRegistry::new());
        let retry_executor = Arc::new(RetryExecutor::new(metrics.clone(), Arc::new(TokioSleeper)));
        let suspension = Arc::new(SuspensionManager::new(store.clone()));
        let async_coordinator = Arc::new(AsyncCoordinator::new(
            store.clone(),
            events.clone(),
            config.progress_persistence_throttle,
        ));
        let executor = Arc::new(CoreExecutor::new(
            store.clone(),
            interceptors.clone(),
            events.clone(),
            retry_executor,
            suspension,
            async_coordinator,
        ));

        Self {
            registry: Arc::new(WorkflowRegistry::new()),
            store,
            events,
            interceptors,
            executor,
            metrics,
            config,
            shutting_down: Arc::new(AtomicBool::new(false)),
            inflight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared retry-metrics registry, for a `metrics` CLI subcommand or
    /// status endpoint to read without threading it through separately.
    pub fn metrics(&self) -> &Arc<RetryMetricsRegistry> {
        &self.metrics
    }

    pub fn register(&self, definition: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>> {
        self.registry.register(definition)
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.add(interceptor);
    }

    pub fn remove_interceptor(&self, name: &str) {
        self.interceptors.remove(name);
    }

    pub fn add_listener(&self, name: impl Into<String>, listener: Arc<dyn Listener>) {
        self.events.add_listener(name, listener);
    }

    pub fn remove_listener(&self, name: &str) {
        self.events.remove_listener(name);
    }

    /// Starts a new run of the latest registered version of
    /// `workflow_id`. Returns immediately with a handle; the run itself
    /// proceeds on the worker pool.
    pub fn execute(&self, workflow_id: &WorkflowId, trigger_data: serde_json::Value) -> Result<ExecutionHandle> {
        let def = self.registry.latest(workflow_id).ok_or_else(|| EngineError::InvalidWorkflow {
            workflow_id: workflow_id.to_string(),
            message: "no version is registered".to_string(),
        })?;
        self.execute_version(def, trigger_data)
    }

    pub fn execute_version(&self, def: Arc<WorkflowDefinition>, trigger_data: serde_json::Value) -> Result<ExecutionHandle> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(EngineError::EngineShutdown {
                run_id: "unassigned".to_string(),
            });
        }
        let run_id = RunId::new();
        Ok(ExecutionHandle::new(run_id, self.spawn_run(def, run_id, trigger_data)))
    }

    /// Resumes a suspended run, resolving its workflow definition from
    /// the instance's own recorded `(workflowId, version)` rather than
    /// requiring the caller to supply it again.
    pub async fn resume(&self, run_id: RunId, value: TypedValue) -> Result<ExecutionHandle> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(EngineError::EngineShutdown {
                run_id: run_id.to_string(),
            });
        }
        let instance = self
            .store
            .load(run_id)
            .await
            .map_err(|e| EngineError::Persistence(e.into()))?
            .ok_or_else(|| EngineError::NotSuspended {
                run_id: run_id.to_string(),
            })?;
        let def = self
            .registry
            .get(&instance.header.workflow_id, &instance.header.version)
            .ok_or_else(|| EngineError::InvalidWorkflow {
                workflow_id: instance.header.workflow_id.to_string(),
                message: format!("version '{}' is not registered", instance.header.version),
            })?;

        let executor = self.executor.clone();
        let inflight = self.inflight.clone();
        let idle = self.idle.clone();
        inflight.fetch_add(1, Ordering::AcqRel);
        let task = tokio::spawn(async move {
            let result = executor.resume(def, run_id, value).await;
            if inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
                idle.notify_waiters();
            }
            result
        });
        Ok(ExecutionHandle::new(run_id, task))
    }

    fn spawn_run(
        &self,
        def: Arc<WorkflowDefinition>,
        run_id: RunId,
        trigger_data: serde_json::Value,
    ) -> tokio::task::JoinHandle<Result<ExecutionOutcome>> {
        let executor = self.executor.clone();
        let inflight = self.inflight.clone();
        let idle = self.idle.clone();
        inflight.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let result = executor.start(def, run_id, trigger_data).await;
            if inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
                idle.notify_waiters();
            }
            result
        })
    }

    /// Cooperative cancellation of a run's currently-executing async
    /// handler. Returns `false` if none is running.
    pub fn cancel_async_operation(&self, run_id: RunId) -> bool {
        self.executor.cancel_async(run_id)
    }

    pub async fn get_workflow_instance(&self, run_id: RunId) -> Result<Option<WorkflowInstance>> {
        self.store.load(run_id).await.map_err(|e| EngineError::Persistence(e.into()))
    }

    /// Non-blocking status check: reads
    /// whatever was last persisted, never waits on an in-flight run.
    pub async fn get_current_result(&self, run_id: RunId) -> Result<Option<RunStatus>> {
        Ok(self.get_workflow_instance(run_id).await?.as_ref().map(RunStatus::from))
    }

    pub async fn list_instances(&self, filter: InstanceFilter, page: Page) -> Result<Vec<WorkflowInstance>> {
        self.store.list(filter, page).await.map_err(|e| EngineError::Persistence(e.into()))
    }

    /// Stops accepting new runs, waits up to `shutdown_grace_period` for
    /// in-flight runs to reach a pause point on their own, then force-
    /// fails whatever is still RUNNING ("graceful
    /// shutdown"). Suspended runs are left alone — they are correctly
    /// paused, not stuck.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace_period;

        while self.inflight.load(Ordering::Acquire) > 0 {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            let _ = tokio::time::timeout(deadline - now, self.idle.notified()).await;
        }

        let still_running = self.inflight.load(Ordering::Acquire);
        if still_running > 0 {
            warn!(still_running, "shutdown grace period elapsed with runs still in flight");
        }

        if let Err(err) = self.fail_running_instances().await {
            warn!(%err, "failed to mark in-flight instances as shut down");
        }
        info!("engine shutdown complete");
    }

    async fn fail_running_instances(&self) -> Result<()> {
        let running = self
            .store
            .list(
                InstanceFilter {
                    workflow_id: None,
                    status: Some(InstanceStatus::Running),
                },
                Page {
                    offset: 0,
                    limit: usize::MAX,
                },
            )
            .await
            .map_err(|e| EngineError::Persistence(e.into()))?;

        for mut instance in running {
            let run_id = instance.header.run_id;
            instance.header.status = InstanceStatus::Failed;
            instance.header.error_info = Some(EngineError::EngineShutdown { run_id: run_id.to_string() }.to_string());
            instance.touch();
            self.store.save(instance).await.map_err(|e| EngineError::Persistence(e.into()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use workflow_core::context::Context;
    use workflow_core::graph::StepNode;
    use workflow_core::result::StepResult;
    use workflow_core::types::TypeTag;
    use workflow_state::store::InMemoryInstanceStore;

    struct Finisher;
    #[async_trait]
    impl workflow_core::step::Step for Finisher {
        async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
            Ok(StepResult::Finish(input.value))
        }
    }

    fn single_step_def() -> WorkflowDefinition {
        let node = StepNode::new(StepId::new("a"), TypeTag::any(), TypeTag::any(), Arc::new(Finisher)).initial();
        WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", vec![node]).unwrap()
    }

    #[tokio::test]
    async fn execute_runs_the_latest_registered_version_to_completion() {
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let engine = Engine::new(EngineConfig::default(), store);
        engine.register(single_step_def()).unwrap();

        let handle = engine.execute(&WorkflowId::new("wf"), serde_json::json!("hi")).unwrap();
        let outcome = handle.get(std::time::Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Finished(v) if v == serde_json::json!("hi")));
    }

    #[tokio::test]
    async fn execute_against_an_unregistered_workflow_is_rejected() {
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let engine = Engine::new(EngineConfig::default(), store);
        let err = engine.execute(&WorkflowId::new("missing"), serde_json::json!(null)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidWorkflow { .. }));
    }

    #[tokio::test]
    async fn get_current_result_reflects_the_persisted_snapshot() {
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let engine = Engine::new(EngineConfig::default(), store);
        engine.register(single_step_def()).unwrap();

        let handle = engine.execute(&WorkflowId::new("wf"), serde_json::json!(1)).unwrap();
        let run_id = handle.run_id();
        handle.get(std::time::Duration::from_secs(5)).await.unwrap();

        let status = engine.get_current_result(run_id).await.unwrap().unwrap();
        assert!(matches!(status, RunStatus::Finish { value } if value == serde_json::json!(1)));
    }

    #[tokio::test]
    async fn shutdown_rejects_further_execute_calls() {
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let engine = Engine::new(EngineConfig::default(), store);
        engine.register(single_step_def()).unwrap();
        engine.shutdown().await;

        let err = engine.execute(&WorkflowId::new("wf"), serde_json::json!(null)).unwrap_err();
        assert!(matches!(err, EngineError::EngineShutdown { .. }));
    }

    #[tokio::test]
    async fn cancel_async_operation_returns_false_when_nothing_is_running() {
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let engine = Engine::new(EngineConfig::default(), store);
        assert!(!engine.cancel_async_operation(RunId::new()));
    }

    #[tokio::test]
    async fn get_current_result_observes_async_progress_while_a_handler_is_in_flight() {
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let run_id = RunId::new();
        let mut instance = WorkflowInstance::new(run_id, WorkflowId::new("wf"), "1.0");
        instance.header.status = InstanceStatus::Suspended;
        instance.async_tasks.push(workflow_state::instance::AsyncTaskRecord::pending(
            "t1",
            run_id,
            StepId::new("search"),
            serde_json::json!({"input": "x"}),
            serde_json::Value::Null,
        ));
        instance.async_tasks[0].update_progress(25, Some("started".to_string()));
        store.create(instance).await.unwrap();

        let engine = Engine::new(EngineConfig::default(), store);
        let status = engine.get_current_result(run_id).await.unwrap().unwrap();
        match status {
            RunStatus::AsyncProgress {
                task_id,
                percent_complete,
                completed,
                ..
            } => {
                assert_eq!(task_id, "t1");
                assert_eq!(percent_complete, 25);
                assert!(!completed);
            }
            other => panic!("expected AsyncProgress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_current_result_observes_the_suspend_prompt() {
        let store: Arc<dyn InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        let engine = Engine::new(EngineConfig::default(), store);
        let ask = StepNode::new(StepId::new("ask"), TypeTag::any(), TypeTag::any(), Arc::new(Asker)).initial();
        engine.register(WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", vec![ask]).unwrap()).unwrap();

        let handle = engine.execute(&WorkflowId::new("wf"), serde_json::json!(null)).unwrap();
        let run_id = handle.run_id();
        handle.get(std::time::Duration::from_secs(5)).await.unwrap();

        let status = engine.get_current_result(run_id).await.unwrap().unwrap();
        assert!(matches!(status, RunStatus::Suspended { prompt, .. } if prompt == serde_json::json!("pick")));
    }

    struct Asker;
    #[async_trait]
    impl workflow_core::step::Step for Asker {
        async fn execute(&self, _input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
            Ok(StepResult::Suspend(workflow_core::result::SuspendRequest::new(serde_json::json!("pick"), "Choice")))
        }
    }
}
