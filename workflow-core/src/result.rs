//! ABOUTME: The six-variant step result taxonomy and its construction contracts
//! ABOUTME: Modeled as a closed sum type so routing dispatch is exhaustive at compile time

use crate::types::{StepId, TypeTag, TypedValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The outcome of one step invocation. Closed set of six variants per
/// adding a variant must update every `match` the compiler
/// flags (no wildcard arms are used in router/retry dispatch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepResult {
    /// Pass `value` to the router for default successor selection.
    Continue(TypedValue),

    /// Route by the runtime type of `event`. `event` must be non-null.
    Branch(TypedValue),

    /// Terminal success for the run.
    Finish(serde_json::Value),

    /// Subject to retry policy. `error` must be non-null.
    Fail(StepFailure),

    /// Pause the run; the next resume must supply a value of
    /// `expected_input_type`.
    Suspend(SuspendRequest),

    /// Schedule a deferred handler keyed by `task_id`; the run goes
    /// SUSPENDED until the handler produces a follow-up result.
    Async(AsyncRequest),
}

impl StepResult {
    pub fn continue_with(value: TypedValue) -> Self {
        Self::Continue(value)
    }

    /// Construct a `Branch`. Panics if `event`'s JSON payload is null —
    /// `Branch(event)` requires `event` to be non-null.
    pub fn branch(event: TypedValue) -> Self {
        assert!(!event.value.is_null(), "Branch event must be non-null");
        Self::Branch(event)
    }

    pub fn finish(value: serde_json::Value) -> Self {
        Self::Finish(value)
    }

    pub fn fail(failure: StepFailure) -> Self {
        Self::Fail(failure)
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Continue(_) => "Continue",
            Self::Branch(_) => "Branch",
            Self::Finish(_) => "Finish",
            Self::Fail(_) => "Fail",
            Self::Suspend(_) => "Suspend",
            Self::Async(_) => "Async",
        }
    }
}

/// The payload of a `Fail` result: a non-null error plus a classification
/// used by the retry executor's `retryOn`/`abortOn` matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailure {
    pub message: String,
    pub kind: TypeTag,
    /// Chain of wrapped causes, most recent first — consulted by
    /// `abortOn`/`retryOn` matching against "wrapped causes" per 
    pub causes: Vec<TypeTag>,
}

impl StepFailure {
    pub fn new(message: impl Into<String>, kind: impl Into<TypeTag>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
            causes: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: impl Into<TypeTag>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Every kind tag this failure can be matched against: itself then
    /// its wrapped causes.
    pub fn kinds(&self) -> impl Iterator<Item = &TypeTag> {
        std::iter::once(&self.kind).chain(self.causes.iter())
    }
}

/// The payload of a `Suspend` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendRequest {
    pub prompt: serde_json::Value,
    pub expected_input_type: TypeTag,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SuspendRequest {
    /// `expected_input_type` is required; `metadata` defaults to empty
    /// construction contract.
    pub fn new(prompt: serde_json::Value, expected_input_type: impl Into<TypeTag>) -> Self {
        Self {
            prompt,
            expected_input_type: expected_input_type.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The payload of an `Async` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncRequest {
    pub task_id: String,
    /// Estimated duration in milliseconds; -1 means unknown.
    pub estimated_ms: i64,
    pub task_args: serde_json::Value,
    pub immediate_value: serde_json::Value,
}

impl AsyncRequest {
    /// `task_id` must be non-blank. `task_args` defaults to an empty
    /// object when omitted via [`AsyncRequest::with_args`].
    pub fn new(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        assert!(!task_id.trim().is_empty(), "task_id must not be blank");
        Self {
            task_id,
            estimated_ms: -1,
            task_args: serde_json::json!({}),
            immediate_value: serde_json::Value::Null,
        }
    }

    pub fn with_estimated_ms(mut self, estimated_ms: i64) -> Self {
        self.estimated_ms = estimated_ms;
        self
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.task_args = args;
        self
    }

    pub fn with_immediate_value(mut self, value: serde_json::Value) -> Self {
        self.immediate_value = value;
        self
    }

    pub fn has_known_estimate(&self) -> bool {
        self.estimated_ms > 0
    }
}

/// A step id paired with an attempt number, used to thread identity
/// through retry and async plumbing without re-deriving it from context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepAttemptId {
    pub step_id: StepId,
    pub attempt: u32,
}
