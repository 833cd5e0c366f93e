//! ABOUTME: The persisted instance snapshot: header, context, history, suspension, async tasks
//! ABOUTME: Encoding is store-specific; only semantic equality across a round-trip is required

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use workflow_core::types::{RunId, StepId, TypeTag, TypedValue, WorkflowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    /// `true` for Completed, Failed, or Cancelled — statuses the state
    /// machine never transitions out of (Running and Suspended both
    /// have live successors).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceHeader {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub version: String,
    pub status: InstanceStatus,
    pub current_step_id: Option<StepId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_info: Option<String>,
    /// The terminal value a `Finish` result resolved to. Set only once,
    /// when `status` transitions to `Completed` — `Finish` never hits
    /// `record_step_output`, so without this the value would be
    /// unrecoverable once the executing task's return has been consumed.
    #[serde(default)]
    pub result_value: Option<serde_json::Value>,
}

/// Context state as persisted: a sorted map so two stores encode the
/// same context identically regardless of hash-map iteration order.
/// `output_order` records step ids in the order their output was
/// recorded — `outputs` alone can't, since `BTreeMap` iterates by key —
/// so a rehydrated context's `last_output` still means "most recent".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub trigger_data: serde_json::Value,
    pub values: BTreeMap<String, serde_json::Value>,
    pub outputs: BTreeMap<String, TypedValue>,
    pub output_order: Vec<String>,
    pub counters: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub sequence: u64,
    pub step_id: StepId,
    pub attempt: u32,
    pub result_kind: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionRecord {
    pub run_id: RunId,
    pub step_id: StepId,
    pub prompt: serde_json::Value,
    pub expected_input_type: TypeTag,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsyncTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncTaskRecord {
    pub task_id: String,
    pub run_id: RunId,
    pub step_id: StepId,
    pub status: AsyncTaskStatus,
    pub percent_complete: u8,
    pub message: Option<String>,
    pub args: serde_json::Value,
    pub immediate_value: serde_json::Value,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AsyncTaskRecord {
    pub fn pending(
        task_id: impl Into<String>,
        run_id: RunId,
        step_id: StepId,
        args: serde_json::Value,
        immediate_value: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            run_id,
            step_id,
            status: AsyncTaskStatus::Pending,
            percent_complete: 0,
            message: None,
            args,
            immediate_value,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Progress updates must never regress the observed percentage
    /// (non-decreasing percent values, reaching 100 only at completion).
    pub fn update_progress(&mut self, percent: u8, message: Option<String>) {
        self.percent_complete = self.percent_complete.max(percent.min(100));
        if message.is_some() {
            self.message = message;
        }
        self.status = AsyncTaskStatus::Running;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub header: InstanceHeader,
    pub context: ContextSnapshot,
    pub history: Vec<ExecutionRecord>,
    pub suspension: Option<SuspensionRecord>,
    pub async_tasks: Vec<AsyncTaskRecord>,
}

impl WorkflowInstance {
    pub fn new(run_id: RunId, workflow_id: WorkflowId, version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            header: InstanceHeader {
                run_id,
                workflow_id,
                version: version.into(),
                status: InstanceStatus::Running,
                current_step_id: None,
                created_at: now,
                updated_at: now,
                error_info: None,
                result_value: None,
            },
            context: ContextSnapshot::default(),
            history: Vec::new(),
            suspension: None,
            async_tasks: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.header.updated_at = Utc::now();
    }

    pub fn next_sequence(&self) -> u64 {
        self.history.last().map(|r| r.sequence + 1).unwrap_or(0)
    }
}
