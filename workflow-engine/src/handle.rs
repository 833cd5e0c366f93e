//! ABOUTME: A handle to one in-flight run, returned by Engine::execute/resume
//! ABOUTME: get() blocks up to a timeout; is_done() polls without consuming the handle

use crate::executor::ExecutionOutcome;
use std::time::Duration;
use tokio::task::JoinHandle;
use workflow_core::error::{EngineError, Result};
use workflow_core::types::RunId;

/// Future-like handle over a spawned run. Unlike a bare
/// `JoinHandle`, `get` distinguishes "still running" (timeout), "the run
/// itself failed" (`ExecutionOutcome::Failed`), and "the task panicked"
/// (an internal error) — three different things a caller needs to react
/// to differently.
pub struct ExecutionHandle {
    run_id: RunId,
    task: JoinHandle<Result<ExecutionOutcome>>,
}

impl ExecutionHandle {
    pub(crate) fn new(run_id: RunId, task: JoinHandle<Result<ExecutionOutcome>>) -> Self {
        Self { run_id, task }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// `true` once the underlying task has returned, panicked, or been
    /// cancelled. Never blocks.
    pub fn is_done(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits up to `timeout` for the run to reach a pause point
    /// (suspended, completed, or failed). A caller that wants to poll
    /// without waiting should check [`Self::is_done`] first.
    pub async fn get(self, timeout: Duration) -> Result<ExecutionOutcome> {
        let run_id = self.run_id;
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(EngineError::internal(format!("run '{run_id}' panicked: {join_err}"))),
            Err(_) => Err(EngineError::RunTimeout {
                run_id: run_id.to_string(),
            }),
        }
    }
}
