//! ABOUTME: The core executor main loop: resolve step, invoke with hooks, route, persist, repeat
//! ABOUTME: One run at a time per run id; concurrent runs proceed independently

use crate::async_coordinator::AsyncCoordinator;
use crate::router::{route, RouteOutcome};
use crate::suspension::SuspensionManager;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};
use workflow_core::context::{Context, InMemoryContext};
use workflow_core::error::{EngineError, Result};
use workflow_core::graph::{StepNode, WorkflowDefinition};
use workflow_core::result::StepResult;
use workflow_core::types::{RunId, StepId, TypedValue};
use workflow_events::bus::EventBus;
use workflow_events::event::WorkflowEvent;
use workflow_hooks::chain::InterceptorChain;
use workflow_state::instance::{AsyncTaskRecord, ContextSnapshot, ExecutionRecord, InstanceStatus, WorkflowInstance};
use workflow_state::store::InstanceStore;

use crate::retry::RetryExecutor;

/// Terminal outcome of driving a run to its next pause point.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Finished(serde_json::Value),
    Suspended,
    Failed(String),
    Cancelled,
}

/// Wires together the router, retry executor, suspension manager, and
/// async coordinator into the per-run control loop.
pub struct CoreExecutor {
    store: Arc<dyn InstanceStore>,
    interceptors: Arc<InterceptorChain>,
    events: Arc<EventBus>,
    retry_executor: Arc<RetryExecutor>,
    suspension: Arc<SuspensionManager>,
    async_coordinator: Arc<AsyncCoordinator>,
    run_locks: DashMap<RunId, Arc<AsyncMutex<()>>>,
}

impl CoreExecutor {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        interceptors: Arc<InterceptorChain>,
        events: Arc<EventBus>,
        retry_executor: Arc<RetryExecutor>,
        suspension: Arc<SuspensionManager>,
        async_coordinator: Arc<AsyncCoordinator>,
    ) -> Self {
        Self {
            store,
            interceptors,
            events,
            retry_executor,
            suspension,
            async_coordinator,
            run_locks: DashMap::new(),
        }
    }

    fn run_lock(&self, run_id: RunId) -> Arc<AsyncMutex<()>> {
        self.run_locks.entry(run_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Create a fresh instance and drive it from its initial step.
    #[instrument(skip(self, def, trigger_data), fields(run_id = %run_id, workflow_id = %def.workflow_id))]
    pub async fn start(
        &self,
        def: Arc<WorkflowDefinition>,
        run_id: RunId,
        trigger_data: serde_json::Value,
    ) -> Result<ExecutionOutcome> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;

        let instance = WorkflowInstance::new(run_id, def.workflow_id.clone(), def.version.clone());
        self.store.create(instance).await.map_err(persistence_err)?;
        self.events
            .publish(WorkflowEvent::Started {
                run_id,
                workflow_id: def.workflow_id.clone(),
                timestamp: Utc::now(),
            })
            .await;

        let ctx = Arc::new(InMemoryContext::new(run_id, trigger_data.clone()));
        let initial = def
            .step(&def.initial_step_id)
            .expect("a registered definition always has its declared initial step");
        let input = TypedValue::new(initial.input_type.clone(), trigger_data);
        self.drive(&def, ctx, run_id, initial, input).await
    }

    /// Validate and apply a resume value, then continue the run from
    /// the step that originally suspended it.
    #[instrument(skip(self, def, value), fields(run_id = %run_id))]
    pub async fn resume(&self, def: Arc<WorkflowDefinition>, run_id: RunId, value: TypedValue) -> Result<ExecutionOutcome> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;

        let (resumed_step_id, value) = self.suspension.resume(run_id, value).await?;
        let instance = self
            .store
            .load(run_id)
            .await
            .map_err(persistence_err)?
            .ok_or_else(|| EngineError::NotSuspended {
                run_id: run_id.to_string(),
            })?;
        let ctx = Arc::new(rehydrate(run_id, &instance));

        self.events
            .publish(WorkflowEvent::Resumed {
                run_id,
                step_id: resumed_step_id.clone(),
                timestamp: Utc::now(),
            })
            .await;

        let resumed_node = def.step(&resumed_step_id).ok_or_else(|| EngineError::UnknownStep {
            workflow_id: def.workflow_id.to_string(),
            step_id: resumed_step_id.to_string(),
        })?;

        // The resumed value is routed exactly as if `resumed_node` had
        // itself just returned `Continue(value)` — true whether it
        // suspended directly or via an async handler.
        let outcome = route(&def, resumed_node, StepResult::Continue(value))?;
        self.persist_context(run_id, ctx.as_ref()).await?;
        self.advance(&def, ctx, run_id, resumed_step_id, outcome).await
    }

    /// Drives `node` and everything after it until the run finishes,
    /// suspends, or fails.
    async fn drive(
        &self,
        def: &WorkflowDefinition,
        ctx: Arc<InMemoryContext>,
        run_id: RunId,
        node: &StepNode,
        input: TypedValue,
    ) -> Result<ExecutionOutcome> {
        let result = self.invoke_with_hooks(run_id, node, input, ctx.as_ref()).await;
        let (result, attempt) = match result {
            Ok(outcome) => outcome,
            Err(err) => return self.fail(def, run_id, &err).await,
        };

        record_output(ctx.as_ref(), &node.step_id, &result);
        self.events
            .publish(WorkflowEvent::StepCompleted {
                run_id,
                step_id: node.step_id.clone(),
                attempt: ctx.step_execution_count(&node.step_id),
                timestamp: Utc::now(),
            })
            .await;
        self.append_history(run_id, &node.step_id, &result, attempt).await?;

        let outcome = match route(def, node, result) {
            Ok(outcome) => outcome,
            Err(err) => return self.fail(def, run_id, &err).await,
        };
        self.persist_context(run_id, ctx.as_ref()).await?;
        self.advance(def, ctx, run_id, node.step_id.clone(), outcome).await
    }

    /// Resolves one [`RouteOutcome`], looping through async-handler
    /// round trips until a terminal or suspending result is reached,
    /// then either persists the pause point or recurses into `drive`
    /// for the next step.
    async fn advance(
        &self,
        def: &WorkflowDefinition,
        ctx: Arc<InMemoryContext>,
        run_id: RunId,
        current_step_id: StepId,
        outcome: RouteOutcome,
    ) -> Result<ExecutionOutcome> {
        match outcome {
            RouteOutcome::Advance { step_id, input } => {
                let next = def.step(&step_id).ok_or_else(|| EngineError::UnknownStep {
                    workflow_id: def.workflow_id.to_string(),
                    step_id: step_id.to_string(),
                })?;
                Box::pin(self.drive(def, ctx, run_id, next, input)).await
            }
            RouteOutcome::Finish(value) => self.complete(def, run_id, value).await,
            RouteOutcome::Suspend(request) => {
                self.suspension.suspend(run_id, current_step_id.clone(), request).await?;
                self.events
                    .publish(WorkflowEvent::Suspended {
                        run_id,
                        step_id: current_step_id,
                        timestamp: Utc::now(),
                    })
                    .await;
                Ok(ExecutionOutcome::Suspended)
            }
            RouteOutcome::Async(request) => self.run_async(def, ctx, run_id, current_step_id, request).await,
        }
    }

    /// Resolves an `Async` request: records the task, dispatches the
    /// handler, and feeds its resolved result back through the router
    /// as if the *originating* step had produced it directly.
    async fn run_async(
        &self,
        def: &WorkflowDefinition,
        ctx: Arc<InMemoryContext>,
        run_id: RunId,
        origin_step_id: StepId,
        request: workflow_core::result::AsyncRequest,
    ) -> Result<ExecutionOutcome> {
        let origin = def.step(&origin_step_id).ok_or_else(|| EngineError::UnknownStep {
            workflow_id: def.workflow_id.to_string(),
            step_id: origin_step_id.to_string(),
        })?;

        let handler = crate::async_coordinator::resolve_handler(def, &request.task_id)?;

        let mut instance = self
            .store
            .load(run_id)
            .await
            .map_err(persistence_err)?
            .ok_or_else(|| EngineError::UnknownStep {
                workflow_id: def.workflow_id.to_string(),
                step_id: origin_step_id.to_string(),
            })?;
        instance.async_tasks.push(AsyncTaskRecord::pending(
            request.task_id.clone(),
            run_id,
            origin_step_id.clone(),
            request.task_args.clone(),
            request.immediate_value.clone(),
        ));
        instance.header.status = InstanceStatus::Suspended;
        instance.header.current_step_id = Some(origin_step_id.clone());
        instance.touch();
        self.store.save(instance).await.map_err(persistence_err)?;
        self.events
            .publish(WorkflowEvent::AsyncScheduled {
                run_id,
                task_id: request.task_id.clone(),
                timestamp: Utc::now(),
            })
            .await;

        let join_handle = self.async_coordinator.spawn(
            handler.executor.clone(),
            handler.step_id.clone(),
            run_id,
            request.task_id.clone(),
            request.task_args.clone(),
            ctx.clone(),
        );

        let handler_result = match join_handle.await {
            Ok(result) => result,
            Err(join_err) => Err(EngineError::internal(format!(
                "async handler for task '{}' panicked: {join_err}",
                request.task_id
            ))),
        };

        // A forceful `cancel_async_operation` call wins over whatever
        // the handler returned — cooperative cancellation only governs
        // how promptly the handler notices and stops, not whether the
        // run ultimately lands on CANCELLED.
        if self.async_coordinator.is_cancelled(run_id) {
            self.mark_async_task(run_id, &request.task_id, workflow_state::instance::AsyncTaskStatus::Cancelled)
                .await?;
            return self.cancel_run(def, run_id).await;
        }

        let resolved = match handler_result {
            Ok(result) => result,
            Err(err) => {
                self.mark_async_task(run_id, &request.task_id, workflow_state::instance::AsyncTaskStatus::Failed)
                    .await?;
                return self.fail(def, run_id, &err).await;
            }
        };
        self.mark_async_task(run_id, &request.task_id, workflow_state::instance::AsyncTaskStatus::Completed)
            .await?;

        record_output(ctx.as_ref(), &origin_step_id, &resolved);
        let outcome = match route(def, origin, resolved) {
            Ok(outcome) => outcome,
            Err(err) => return self.fail(def, run_id, &err).await,
        };
        self.persist_context(run_id, ctx.as_ref()).await?;
        Box::pin(self.advance(def, ctx, run_id, origin_step_id, outcome)).await
    }

    async fn invoke_with_hooks(
        &self,
        run_id: RunId,
        node: &StepNode,
        input: TypedValue,
        ctx: &InMemoryContext,
    ) -> Result<(StepResult, u32)> {
        if let Some(replacement) = self.interceptors.run_before_step(run_id, &node.step_id, &input).await? {
            return Ok((replacement, 1));
        }
        let result = self.retry_executor.invoke(node, input, ctx, run_id).await;
        match &result {
            Ok((result, _attempt)) => self.interceptors.run_after_step(run_id, &node.step_id, result).await?,
            Err(err) => self.interceptors.run_on_step_error(run_id, &node.step_id, err).await?,
        }
        result
    }

    async fn complete(&self, def: &WorkflowDefinition, run_id: RunId, value: serde_json::Value) -> Result<ExecutionOutcome> {
        if let Some(mut instance) = self.store.load(run_id).await.map_err(persistence_err)? {
            instance.header.status = InstanceStatus::Completed;
            instance.header.result_value = Some(value.clone());
            instance.touch();
            self.store.save(instance).await.map_err(persistence_err)?;
        }
        self.events
            .publish(WorkflowEvent::Completed {
                run_id,
                workflow_id: def.workflow_id.clone(),
                timestamp: Utc::now(),
            })
            .await;
        info!(%run_id, "workflow run completed");
        Ok(ExecutionOutcome::Finished(value))
    }

    /// Forceful run termination following a `cancel_async_operation`
    /// call: no further step is scheduled, regardless of what the
    /// in-flight handler returned.
    async fn cancel_run(&self, def: &WorkflowDefinition, run_id: RunId) -> Result<ExecutionOutcome> {
        if let Some(mut instance) = self.store.load(run_id).await.map_err(persistence_err)? {
            instance.header.status = InstanceStatus::Cancelled;
            instance.touch();
            self.store.save(instance).await.map_err(persistence_err)?;
        }
        self.events
            .publish(WorkflowEvent::Cancelled {
                run_id,
                workflow_id: def.workflow_id.clone(),
                timestamp: Utc::now(),
            })
            .await;
        info!(%run_id, "workflow run cancelled");
        Ok(ExecutionOutcome::Cancelled)
    }

    async fn fail(&self, def: &WorkflowDefinition, run_id: RunId, err: &EngineError) -> Result<ExecutionOutcome> {
        warn!(%run_id, %err, "workflow run failed");
        if let Some(mut instance) = self.store.load(run_id).await.map_err(persistence_err)? {
            instance.header.status = InstanceStatus::Failed;
            instance.header.error_info = Some(err.to_string());
            instance.touch();
            self.store.save(instance).await.map_err(persistence_err)?;
        }
        self.events
            .publish(WorkflowEvent::Failed {
                run_id,
                workflow_id: def.workflow_id.clone(),
                reason: err.to_string(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(ExecutionOutcome::Failed(err.to_string()))
    }

    async fn append_history(&self, run_id: RunId, step_id: &StepId, result: &StepResult, attempt: u32) -> Result<()> {
        let Some(mut instance) = self.store.load(run_id).await.map_err(persistence_err)? else {
            return Ok(());
        };
        let sequence = instance.next_sequence();
        instance.history.push(ExecutionRecord {
            sequence,
            step_id: step_id.clone(),
            attempt,
            result_kind: result.variant_name().to_string(),
            timestamp: Utc::now(),
        });
        instance.header.current_step_id = Some(step_id.clone());
        instance.touch();
        self.store.save(instance).await.map_err(persistence_err)
    }

    /// Records an async handler's terminal status on its task record
    /// (the resolved result is "cached on the async task
    /// record"). A no-op if the instance or task has since been removed.
    async fn mark_async_task(
        &self,
        run_id: RunId,
        task_id: &str,
        status: workflow_state::instance::AsyncTaskStatus,
    ) -> Result<()> {
        let Some(mut instance) = self.store.load(run_id).await.map_err(persistence_err)? else {
            return Ok(());
        };
        if let Some(task) = instance.async_tasks.iter_mut().find(|t| t.task_id == task_id) {
            task.status = status;
            task.updated_at = Utc::now();
        }
        instance.touch();
        self.store.save(instance).await.map_err(persistence_err)
    }

    async fn persist_context(&self, run_id: RunId, ctx: &InMemoryContext) -> Result<()> {
        let Some(mut instance) = self.store.load(run_id).await.map_err(persistence_err)? else {
            return Ok(());
        };
        instance.context = snapshot(ctx);
        instance.touch();
        self.store.save(instance).await.map_err(persistence_err)
    }

    /// Cancel any in-flight async handler for `run_id`. Returns `false`
    /// if none is running.
    pub fn cancel_async(&self, run_id: RunId) -> bool {
        self.async_coordinator.cancel(run_id)
    }
}

/// Records a step's typed output for `last_output`'s ancestor-tag
/// lookups. Only `Continue`/`Branch` carry a [`TypedValue`] worth
/// keeping — `Finish` is terminal and `Suspend`/`Async` have no output
/// until their eventual resume/resolution is itself routed.
fn record_output(ctx: &InMemoryContext, step_id: &StepId, result: &StepResult) {
    if let StepResult::Continue(value) | StepResult::Branch(value) = result {
        ctx.record_step_output(step_id.clone(), value.clone());
    }
}

fn snapshot(ctx: &InMemoryContext) -> ContextSnapshot {
    ContextSnapshot {
        trigger_data: ctx.trigger_data(),
        values: ctx.snapshot_values().into_iter().collect(),
        outputs: ctx
            .snapshot_outputs_in_order()
            .into_iter()
            .map(|(step_id, value)| (step_id.to_string(), value))
            .collect(),
        output_order: ctx.snapshot_outputs_in_order().into_iter().map(|(step_id, _)| step_id.to_string()).collect(),
        counters: ctx.snapshot_counters().into_iter().map(|(step_id, count)| (step_id.to_string(), count)).collect(),
    }
}

fn rehydrate(run_id: RunId, instance: &WorkflowInstance) -> InMemoryContext {
    let ordered_outputs = instance.context.output_order.iter().filter_map(|step_id| {
        instance
            .context
            .outputs
            .get(step_id)
            .map(|value| (StepId::new(step_id.clone()), value.clone()))
    });
    InMemoryContext::restore(
        run_id,
        instance.context.trigger_data.clone(),
        instance.context.values.clone(),
        ordered_outputs,
        instance
            .context
            .counters
            .iter()
            .map(|(step_id, count)| (StepId::new(step_id.clone()), *count)),
    )
}

fn persistence_err(err: workflow_state::error::StateError) -> EngineError {
    EngineError::Persistence(err.into())
}
