//! ABOUTME: State-specific error types for instance, suspension, and async-task persistence

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("storage backend error: {0}")]
    StorageError(#[from] anyhow::Error),

    #[error("state serialization failed: {0}")]
    SerializationError(String),

    #[error("state deserialization failed: {0}")]
    DeserializationError(String),

    #[error("no instance found for run '{0}'")]
    NotFound(String),
}

pub type StateResult<T> = Result<T, StateError>;
