//! ABOUTME: Entry point: parse args, build an Engine over a sled-persisted store, dispatch

use clap::Parser;
use std::sync::Arc;
use workflow_cli::cli::Cli;
use workflow_cli::commands::{dispatch, register_demo_workflows};
use workflow_cli::config::load_cli_config;
use workflow_engine::engine::Engine;
use workflow_state::store::BackendInstanceStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = workflow_core::logging::init_logging();

    let cli = Cli::parse();
    let mut config = load_cli_config(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    std::fs::create_dir_all(&config.data_dir)?;

    let backend = workflow_state::backend::SledBackend::shared(&config.data_dir)?;
    let store: Arc<dyn workflow_state::store::InstanceStore> =
        Arc::new(BackendInstanceStore::new(backend, "workflow-cli"));
    let engine = Engine::new(config.engine, store);
    register_demo_workflows(&engine)?;

    dispatch(&engine, cli.command, cli.output).await?;
    engine.shutdown().await;
    Ok(())
}
