//! ABOUTME: The workflow lifecycle event taxonomy fanned out by the bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use workflow_core::types::{RunId, StepId, WorkflowId};

/// One workflow-level lifecycle occurrence. Distinct from a [`StepResult`]
/// (a step's own typed outcome) — these are the coarse-grained moments an
/// external listener cares about: a run starting, pausing, finishing.
///
/// [`StepResult`]: workflow_core::result::StepResult
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowEvent {
    Started {
        run_id: RunId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        run_id: RunId,
        step_id: StepId,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    Suspended {
        run_id: RunId,
        step_id: StepId,
        timestamp: DateTime<Utc>,
    },
    Resumed {
        run_id: RunId,
        step_id: StepId,
        timestamp: DateTime<Utc>,
    },
    AsyncScheduled {
        run_id: RunId,
        task_id: String,
        timestamp: DateTime<Utc>,
    },
    AsyncProgress {
        run_id: RunId,
        task_id: String,
        percent_complete: u8,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Completed {
        run_id: RunId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    Failed {
        run_id: RunId,
        workflow_id: WorkflowId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        run_id: RunId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Started { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::Suspended { run_id, .. }
            | Self::Resumed { run_id, .. }
            | Self::AsyncScheduled { run_id, .. }
            | Self::AsyncProgress { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Failed { run_id, .. }
            | Self::Cancelled { run_id, .. } => *run_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::StepCompleted { .. } => "step_completed",
            Self::Suspended { .. } => "suspended",
            Self::Resumed { .. } => "resumed",
            Self::AsyncScheduled { .. } => "async_scheduled",
            Self::AsyncProgress { .. } => "async_progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}
