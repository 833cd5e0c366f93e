//! ABOUTME: CLI configuration: where instance state is persisted, plus engine tunables
//! ABOUTME: Layered default/file/env, mirroring workflow-engine's own sparse-overlay merge

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use workflow_engine::config::{EngineConfig, EngineConfigOverlay};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory holding the sled database of workflow instances.
    pub data_dir: PathBuf,
    pub engine: EngineConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            engine: EngineConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("workflow-cli")
}

/// The sparse layer merged over [`CliConfig::default`], decoded from an
/// optional config file and `WORKFLOW_CLI__*` environment variables.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CliConfigOverlay {
    pub data_dir: Option<PathBuf>,
    pub engine: Option<EngineConfigOverlay>,
}

impl CliConfig {
    pub fn merge(mut self, overlay: CliConfigOverlay) -> Self {
        if let Some(v) = overlay.data_dir {
            self.data_dir = v;
        }
        if let Some(engine_overlay) = overlay.engine {
            self.engine = self.engine.merge(engine_overlay);
        }
        self
    }
}

/// Loads configuration layered default -> optional file (`--config`, or
/// `workflow-cli.{toml,json,yaml}` in the working directory) ->
/// `WORKFLOW_CLI__*` environment variables.
pub fn load_cli_config(config_path: Option<&std::path::Path>) -> anyhow::Result<CliConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    } else {
        builder = builder.add_source(config::File::with_name("workflow-cli").required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("WORKFLOW_CLI").separator("__"));
    let settings = builder.build()?;

    let overlay: CliConfigOverlay = settings.try_deserialize().unwrap_or_default();
    Ok(CliConfig::default().merge(overlay))
}
