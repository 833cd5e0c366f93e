//! ABOUTME: Instance, suspension, and async-task persistence for the workflow execution engine

pub mod backend;
pub mod error;
pub mod instance;
pub mod store;

pub mod prelude {
    pub use crate::backend::{MemoryBackend, SledBackend, StorageBackend};
    pub use crate::error::{StateError, StateResult};
    pub use crate::instance::{
        AsyncTaskRecord, AsyncTaskStatus, ContextSnapshot, ExecutionRecord, InstanceHeader,
        InstanceStatus, SuspensionRecord, WorkflowInstance,
    };
    pub use crate::store::{BackendInstanceStore, InMemoryInstanceStore, InstanceFilter, InstanceStore, Page};
}
