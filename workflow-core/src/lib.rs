//! ABOUTME: Core types, traits, and error handling for the workflow execution engine
//! ABOUTME: No I/O, no scheduling — just the vocabulary every other crate in the workspace shares

pub mod context;
pub mod error;
pub mod graph;
pub mod logging;
pub mod result;
pub mod step;
pub mod types;

/// Re-exports the names most callers need, a flat prelude instead of
/// making every crate spell out `workflow_core::types::TypedValue` in
/// full.
pub mod prelude {
    pub use crate::context::{Context, InMemoryContext, ProgressReporter, RetryAttempt, RetryContext};
    pub use crate::error::{EngineError, Result};
    pub use crate::graph::{JitterMode, OnLimitBehavior, RetryPolicy, StepNode, WorkflowDefinition};
    pub use crate::result::{AsyncRequest, StepAttemptId, StepFailure, StepResult, SuspendRequest};
    pub use crate::step::{BoxedStep, Step};
    pub use crate::types::{RunId, StepId, TypeTag, TypedValue, WorkflowId};
}
