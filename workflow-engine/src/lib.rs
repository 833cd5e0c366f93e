//! ABOUTME: The workflow execution engine: router, retry executor, async coordinator,
//! ABOUTME: suspension manager, core executor, registry, and top-level Engine façade

pub mod async_coordinator;
pub mod config;
pub mod context_ext;
pub mod engine;
pub mod executor;
pub mod handle;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod router;
pub mod suspension;

pub use config::{EngineConfig, EngineConfigBuilder, EngineConfigOverlay};
pub use engine::{Engine, RunStatus};
pub use executor::{CoreExecutor, ExecutionOutcome};
pub use handle::ExecutionHandle;
pub use metrics::{RetryMetricsRegistry, StepRetryMetrics};
pub use registry::WorkflowRegistry;
pub use router::{route, RouteOutcome};
pub use suspension::{SchemaProvider, SuspensionManager};
