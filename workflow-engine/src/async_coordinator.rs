//! ABOUTME: Runs deferred async-handler steps and reports their progress back to the run
//! ABOUTME: Handlers execute on the tokio worker pool; one run's handlers are always serialized

use crate::context_ext::AsyncExecContext;
use chrono::Utc;
use glob::Pattern;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use workflow_core::context::{Context, ProgressReporter};
use workflow_core::error::{EngineError, Result};
use workflow_core::graph::{StepNode, WorkflowDefinition};
use workflow_core::result::StepResult;
use workflow_core::types::{RunId, TypedValue};
use workflow_events::bus::EventBus;
use workflow_events::event::WorkflowEvent;
use workflow_state::store::InstanceStore;

/// Finds the step flagged `is_async_handler` whose id — treated as a
/// glob pattern, e.g. `"search-*"` — matches `task_id`. The first
/// declared match wins.
pub fn resolve_handler<'a>(def: &'a WorkflowDefinition, task_id: &str) -> Result<&'a StepNode> {
    def.steps()
        .find(|node| {
            node.is_async_handler
                && Pattern::new(node.step_id.as_str())
                    .map(|p| p.matches(task_id))
                    .unwrap_or(false)
        })
        .ok_or_else(|| EngineError::NoAsyncHandler {
            task_id: task_id.to_string(),
        })
}

/// Reports async-handler progress into the instance store, throttled to
/// at most one write per `throttle`, and exposes the
/// cooperative cancellation flag the handler must poll.
pub struct AsyncProgressHandle {
    run_id: RunId,
    task_id: String,
    percent: AtomicU8,
    message: parking_lot::Mutex<Option<String>>,
    store: Arc<dyn InstanceStore>,
    events: Arc<EventBus>,
    throttle: Duration,
    last_persisted: parking_lot::Mutex<Instant>,
    cancel_token: CancellationToken,
}

impl AsyncProgressHandle {
    pub fn new(
        run_id: RunId,
        task_id: String,
        store: Arc<dyn InstanceStore>,
        events: Arc<EventBus>,
        throttle: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            task_id,
            percent: AtomicU8::new(0),
            message: parking_lot::Mutex::new(None),
            store,
            events,
            throttle,
            last_persisted: parking_lot::Mutex::new(Instant::now() - throttle),
            cancel_token,
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }

    pub fn message(&self) -> Option<String> {
        self.message.lock().clone()
    }

    /// Persist the current progress unconditionally, bypassing the
    /// throttle — used once the handler's final result is known. Task
    /// status (Completed/Failed/Cancelled) is the executor's call, made
    /// after it has the handler's resolved `StepResult`.
    pub async fn flush(&self) {
        persist(
            self.store.clone(),
            self.events.clone(),
            self.run_id,
            self.task_id.clone(),
            self.percent(),
            self.message(),
        )
        .await;
    }
}

impl ProgressReporter for AsyncProgressHandle {
    fn update_progress(&self, percent: u8, message: Option<String>) {
        self.percent.store(percent.min(100), Ordering::Relaxed);
        if message.is_some() {
            *self.message.lock() = message;
        }

        let due = {
            let mut last = self.last_persisted.lock();
            if last.elapsed() >= self.throttle {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            let store = self.store.clone();
            let events = self.events.clone();
            let run_id = self.run_id;
            let task_id = self.task_id.clone();
            let percent = self.percent();
            let message = self.message();
            tokio::spawn(async move {
                persist(store, events, run_id, task_id, percent, message).await;
            });
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

async fn persist(
    store: Arc<dyn InstanceStore>,
    events: Arc<EventBus>,
    run_id: RunId,
    task_id: String,
    percent: u8,
    message: Option<String>,
) {
    let Ok(Some(mut instance)) = store.load(run_id).await else {
        return;
    };
    if let Some(task) = instance.async_tasks.iter_mut().find(|t| t.task_id == task_id) {
        task.update_progress(percent, message.clone());
        instance.touch();
        if let Err(err) = store.save(instance).await {
            warn!(%run_id, task_id, %err, "failed to persist async progress");
            return;
        }
        events
            .publish(WorkflowEvent::AsyncProgress {
                run_id,
                task_id,
                percent_complete: percent,
                message,
                timestamp: Utc::now(),
            })
            .await;
    }
}

/// Coordinates async-handler execution: resolves the handler, spawns it
/// with a cancellation token and progress reporter, and serializes
/// handlers belonging to the same run via `run_locks`.
pub struct AsyncCoordinator {
    store: Arc<dyn InstanceStore>,
    events: Arc<EventBus>,
    progress_throttle: Duration,
    cancel_tokens: dashmap::DashMap<RunId, CancellationToken>,
}

impl AsyncCoordinator {
    pub fn new(store: Arc<dyn InstanceStore>, events: Arc<EventBus>, progress_throttle: Duration) -> Self {
        Self {
            store,
            events,
            progress_throttle,
            cancel_tokens: dashmap::DashMap::new(),
        }
    }

    /// Cooperative cancellation: sets the flag the
    /// handler's `isCancelled()` observes. Returns `false` if no async
    /// task is currently running for `run_id`.
    pub fn cancel(&self, run_id: RunId) -> bool {
        if let Some(token) = self.cancel_tokens.get(&run_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Whether `run_id`'s current (or most recent) async handler has
    /// been asked to cancel. Checked by the executor once the handler
    /// returns, so a forceful run cancellation takes precedence over
    /// whatever result the handler produced.
    pub fn is_cancelled(&self, run_id: RunId) -> bool {
        self.cancel_tokens.get(&run_id).map(|token| token.is_cancelled()).unwrap_or(false)
    }

    /// Spawn `handler` on the worker pool. `ctx` is the run's shared
    /// context; the handler sees an [`AsyncExecContext`] wrapping it
    /// with a progress reporter and the run's `is_cancelled` flag.
    pub fn spawn(
        &self,
        handler: Arc<dyn workflow_core::step::Step>,
        handler_step_id: workflow_core::types::StepId,
        run_id: RunId,
        task_id: String,
        args: serde_json::Value,
        ctx: Arc<dyn Context>,
    ) -> tokio::task::JoinHandle<Result<StepResult>> {
        let token = CancellationToken::new();
        self.cancel_tokens.insert(run_id, token.clone());
        let reporter = Arc::new(AsyncProgressHandle::new(
            run_id,
            task_id,
            self.store.clone(),
            self.events.clone(),
            self.progress_throttle,
            token,
        ));

        tokio::spawn(async move {
            let async_ctx = AsyncExecContext::new(ctx, reporter.clone());
            async_ctx.set_current_step(handler_step_id);
            let input = TypedValue::new("AsyncArgs", args);
            let result = handler.execute(input, &async_ctx).await;
            reporter.flush().await;
            result
        })
    }
}
