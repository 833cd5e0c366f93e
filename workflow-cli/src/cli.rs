//! ABOUTME: CLI argument parsing — register/run/resume/cancel/status/list/metrics over the engine
//! ABOUTME: A thin adapter: every subcommand is a handful of lines of Engine calls in commands.rs

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output mode available on every subcommand that prints structured data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "workflow-cli", about = "Command-line adapter over the in-process workflow engine", version)]
pub struct Cli {
    /// Path to a config file (TOML/JSON/YAML); defaults to `workflow-cli.*` in the cwd.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory sled persists workflow instances under.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the workflows available to run (the built-in demo set).
    Register,

    /// Start a new run of a registered workflow.
    Run {
        /// Registered workflow id (see `register`).
        workflow_id: String,
        /// Trigger data as a JSON literal; defaults to `null`.
        #[arg(default_value = "null")]
        trigger_data: String,
    },

    /// Resume a suspended run.
    Resume {
        run_id: uuid::Uuid,
        /// The resume value as a JSON literal.
        value: String,
        /// Declared type tag of the resume value (must satisfy the
        /// suspension's expected type).
        #[arg(long, default_value = "Any")]
        value_type: String,
    },

    /// Cooperatively cancel a run's in-flight async handler.
    Cancel { run_id: uuid::Uuid },

    /// Show a run's last-persisted status.
    Status { run_id: uuid::Uuid },

    /// List instances, optionally filtered by workflow id or status.
    List {
        #[arg(long)]
        workflow_id: Option<String>,
        #[arg(long, value_enum)]
        status: Option<InstanceStatusArg>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show retry metrics for one step, or the global roll-up.
    Metrics {
        #[arg(long)]
        step_id: Option<String>,
    },

    /// Print version and build information.
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InstanceStatusArg {
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl From<InstanceStatusArg> for workflow_state::instance::InstanceStatus {
    fn from(value: InstanceStatusArg) -> Self {
        use workflow_state::instance::InstanceStatus;
        match value {
            InstanceStatusArg::Running => InstanceStatus::Running,
            InstanceStatusArg::Suspended => InstanceStatus::Suspended,
            InstanceStatusArg::Completed => InstanceStatus::Completed,
            InstanceStatusArg::Failed => InstanceStatus::Failed,
            InstanceStatusArg::Cancelled => InstanceStatus::Cancelled,
        }
    }
}
