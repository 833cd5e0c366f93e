//! ABOUTME: Subcommand implementations, each a thin translation from parsed args to Engine calls

use crate::cli::{Commands, OutputFormat};
use crate::demo_workflows::{flaky_sum_workflow, greet_workflow, search_workflow};
use crate::output::{format_instance_list, format_metrics, format_run_status};
use std::time::Duration;
use workflow_engine::engine::Engine;
use workflow_engine::executor::ExecutionOutcome;
use workflow_core::types::{RunId, StepId, TypeTag, TypedValue, WorkflowId};
use workflow_state::store::{InstanceFilter, Page};

/// Workflow ids this CLI knows how to register. The registry is
/// compiled in rather than loaded from a definition file — a thin CLI
/// over an in-process engine has no external definition source.
pub const DEMO_WORKFLOW_IDS: &[&str] = &["greet", "flaky-sum", "search"];

pub fn register_demo_workflows(engine: &Engine) -> anyhow::Result<()> {
    engine.register(greet_workflow())?;
    engine.register(flaky_sum_workflow())?;
    engine.register(search_workflow())?;
    Ok(())
}

/// How long `run`/`resume` wait for a run to reach its next pause point
/// before reporting it as still in flight rather than blocking forever.
const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn dispatch(engine: &Engine, command: Commands, output: OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::Register => {
            for id in DEMO_WORKFLOW_IDS {
                println!("{id}");
            }
        }
        Commands::Run { workflow_id, trigger_data } => {
            let trigger_data: serde_json::Value = serde_json::from_str(&trigger_data)?;
            let handle = engine.execute(&WorkflowId::new(workflow_id), trigger_data)?;
            let run_id = handle.run_id();
            println!("started run {run_id}");
            let outcome = handle.get(WAIT_TIMEOUT).await?;
            print_outcome(run_id, &outcome);
        }
        Commands::Resume { run_id, value, value_type } => {
            let run_id = RunId::from_uuid(run_id);
            let value: serde_json::Value = serde_json::from_str(&value)?;
            let typed = TypedValue::new(TypeTag::new(value_type), value);
            let handle = engine.resume(run_id, typed).await?;
            let outcome = handle.get(WAIT_TIMEOUT).await?;
            print_outcome(run_id, &outcome);
        }
        Commands::Cancel { run_id } => {
            let cancelled = engine.cancel_async_operation(RunId::from_uuid(run_id));
            println!("{}", if cancelled { "cancelled" } else { "nothing in flight for that run" });
        }
        Commands::Status { run_id } => {
            let run_id = RunId::from_uuid(run_id);
            let status = engine
                .get_current_result(run_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no such run '{run_id}'"))?;
            println!("{}", format_run_status(&run_id.to_string(), &status, output)?);
        }
        Commands::List { workflow_id, status, limit, offset } => {
            let filter = InstanceFilter {
                workflow_id: workflow_id.map(WorkflowId::new),
                status: status.map(Into::into),
            };
            let instances = engine.list_instances(filter, Page { offset, limit }).await?;
            println!("{}", format_instance_list(&instances, output)?);
        }
        Commands::Metrics { step_id } => {
            let metrics = match &step_id {
                Some(id) => engine.metrics().step_metrics(&StepId::new(id.clone())),
                None => engine.metrics().global_metrics(),
            };
            println!("{}", format_metrics(step_id.as_deref(), &metrics, output)?);
        }
        Commands::Version => println!("{}", version_info()),
    }
    Ok(())
}

/// Version string, enriched with the build script's git hash and
/// build profile when they're available (absent in a build that never
/// ran `build.rs` against a git checkout).
fn version_info() -> String {
    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("WORKFLOW_CLI_GIT_HASH").filter(|s| !s.is_empty());
    let profile = option_env!("WORKFLOW_CLI_BUILD_PROFILE").unwrap_or("unknown");
    match git_hash {
        Some(hash) => format!("workflow-cli {version} ({hash}, {profile})"),
        None => format!("workflow-cli {version} ({profile})"),
    }
}

fn print_outcome(run_id: RunId, outcome: &ExecutionOutcome) {
    match outcome {
        ExecutionOutcome::Finished(value) => println!("run {run_id} finished: {value}"),
        ExecutionOutcome::Suspended => println!("run {run_id} suspended — resume with `resume {run_id} <value>`"),
        ExecutionOutcome::Failed(message) => println!("run {run_id} failed: {message}"),
        ExecutionOutcome::Cancelled => println!("run {run_id} cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use workflow_engine::config::EngineConfig;
    use workflow_state::store::InMemoryInstanceStore;

    fn test_engine() -> Engine {
        let store: Arc<dyn workflow_state::store::InstanceStore> = Arc::new(InMemoryInstanceStore::new());
        Engine::new(EngineConfig::default(), store)
    }

    #[tokio::test]
    async fn register_then_run_greet_suspends() {
        let engine = test_engine();
        register_demo_workflows(&engine).unwrap();
        dispatch(
            &engine,
            Commands::Run {
                workflow_id: "greet".to_string(),
                trigger_data: "null".to_string(),
            },
            OutputFormat::Text,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_against_unknown_workflow_errors() {
        let engine = test_engine();
        register_demo_workflows(&engine).unwrap();
        let result = dispatch(
            &engine,
            Commands::Run {
                workflow_id: "does-not-exist".to_string(),
                trigger_data: "null".to_string(),
            },
            OutputFormat::Text,
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn version_info_always_includes_the_crate_version() {
        assert!(version_info().contains(env!("CARGO_PKG_VERSION")));
    }
}
