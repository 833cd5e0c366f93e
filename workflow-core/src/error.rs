//! ABOUTME: Error types and handling for the workflow engine
//! ABOUTME: Provides EngineError enum and the crate-wide Result type alias

use thiserror::Error;

/// Comprehensive error enum covering every error kind the engine surfaces
/// in `errorInfo`, graph registration, routing, retry, suspension, and
/// async coordination.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A step threw or returned `Fail`; subject to retry policy.
    #[error("step '{step_id}' invocation failed: {message}")]
    StepInvocation { step_id: String, message: String },

    /// Retry attempts were exhausted for a step.
    #[error("retry exhausted for step '{step_id}' after {attempts} attempt(s)")]
    RetryExhausted { step_id: String, attempts: u32 },

    /// A step's invocation limit was exceeded and `onLimit` is `ERROR`.
    #[error("invocation limit exceeded for step '{step_id}' (limit {limit})")]
    InvocationLimitExceeded { step_id: String, limit: u32 },

    /// A `Continue`/`Branch` result matched more than one successor and
    /// the tie-break rule could not resolve it.
    #[error("ambiguous branch from step '{step_id}': {candidates:?}")]
    AmbiguousBranch {
        step_id: String,
        candidates: Vec<String>,
    },

    /// A step declared as initial (or any step) returned `Continue` with
    /// no declared successor.
    #[error("step '{step_id}' has no successor for its result")]
    MissingSuccessor { step_id: String },

    /// An `Async` result named a task id with no matching async handler.
    #[error("no async handler matches task id '{task_id}'")]
    NoAsyncHandler { task_id: String },

    /// A router or resume operation referenced a step id not present in
    /// the workflow graph.
    #[error("unknown step '{step_id}' in workflow '{workflow_id}'")]
    UnknownStep {
        workflow_id: String,
        step_id: String,
    },

    /// Graph registration rejected a malformed workflow definition.
    #[error("workflow '{workflow_id}' is invalid: {message}")]
    InvalidWorkflow { workflow_id: String, message: String },

    /// `resume(runId, value)` supplied a value of the wrong type.
    #[error("resume value for run '{run_id}' does not match expected type '{expected}'")]
    ResumeTypeMismatch { run_id: String, expected: String },

    /// `resume`/`cancelAsyncOperation` targeted a run with no pending
    /// suspension.
    #[error("run '{run_id}' is not suspended")]
    NotSuspended { run_id: String },

    /// A run exceeded its configured wall-clock timeout.
    #[error("run '{run_id}' exceeded its timeout")]
    RunTimeout { run_id: String },

    /// The engine was shut down while the run was still in flight.
    #[error("engine shutdown while run '{run_id}' was in flight")]
    EngineShutdown { run_id: String },

    /// The instance store (or another pluggable backend) failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    /// Catch-all for invariant violations that should never occur in a
    /// correctly wired engine.
    #[error("internal engine error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn step_invocation(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepInvocation {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error kinds classified as graph misconfiguration:
    /// terminal and, where possible, reported at registration time.
    pub fn is_graph_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousBranch { .. }
                | Self::MissingSuccessor { .. }
                | Self::NoAsyncHandler { .. }
                | Self::UnknownStep { .. }
                | Self::InvalidWorkflow { .. }
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
