//! ABOUTME: Test harness for the workflow execution engine
//! ABOUTME: in-memory store re-export, deterministic sleeper, definition builders, mock interceptors

pub mod builders;
pub mod interceptors;
pub mod sleeper;

pub use builders::{fn_step, EchoStep, FnStep};
pub use interceptors::{MockRegistry, RecordingInterceptor};
pub use sleeper::RecordingSleeper;
pub use workflow_state::store::InMemoryInstanceStore;
