//! ABOUTME: Layered engine configuration built on the `config` crate's merge pattern
//! ABOUTME: A base default overlaid by optional file/env layers, no LLM-provider profile/preset system

use serde::{Deserialize, Serialize};
use std::time::Duration;
use workflow_core::graph::RetryPolicy;

/// Engine-wide tunables. Construct with
/// [`EngineConfig::default`] or [`EngineConfig::builder`], then optionally
/// layer a `serde`-deserializable file/env override with [`EngineConfig::merge`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub worker_pool_core_size: usize,
    pub worker_pool_max_size: usize,
    pub scheduled_task_pool_size: usize,
    pub default_retry_policy: Option<RetryPolicyConfig>,
    /// Multiplier applied to a step's `estimatedMs` before the async
    /// coordinator logs a timeout warning. Default 3.0.
    pub async_timeout_factor: f64,
    pub progress_persistence_throttle: Duration,
    pub shutdown_grace_period: Duration,
    pub default_run_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_core_size: 4,
            worker_pool_max_size: 16,
            scheduled_task_pool_size: 2,
            default_retry_policy: None,
            async_timeout_factor: 3.0,
            progress_persistence_throttle: Duration::from_millis(250),
            shutdown_grace_period: Duration::from_secs(30),
            default_run_timeout: None,
        }
    }
}

/// A serde-friendly mirror of [`RetryPolicy`] used for config-file layering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(cfg: &RetryPolicyConfig) -> Self {
        RetryPolicy::new(
            cfg.max_attempts,
            Duration::from_millis(cfg.delay_ms),
            cfg.backoff_multiplier,
        )
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Overlay a partially-populated config (as decoded from a file/env
    /// layer via the `config` crate) on top of this one. Every
    /// `Some`-valued field in `overlay` wins.
    pub fn merge(mut self, overlay: EngineConfigOverlay) -> Self {
        if let Some(v) = overlay.worker_pool_core_size {
            self.worker_pool_core_size = v;
        }
        if let Some(v) = overlay.worker_pool_max_size {
            self.worker_pool_max_size = v;
        }
        if let Some(v) = overlay.scheduled_task_pool_size {
            self.scheduled_task_pool_size = v;
        }
        if let Some(v) = overlay.default_retry_policy {
            self.default_retry_policy = Some(v);
        }
        if let Some(v) = overlay.async_timeout_factor {
            self.async_timeout_factor = v;
        }
        if let Some(v) = overlay.progress_persistence_throttle_ms {
            self.progress_persistence_throttle = Duration::from_millis(v);
        }
        if let Some(v) = overlay.shutdown_grace_period_secs {
            self.shutdown_grace_period = Duration::from_secs(v);
        }
        if let Some(v) = overlay.default_run_timeout_secs {
            self.default_run_timeout = Some(Duration::from_secs(v));
        }
        self
    }
}

/// The sparse layer merged over [`EngineConfig::default`] — one field
/// per tunable, all optional, deserializable from a file or environment
/// via the `config` crate's builder.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EngineConfigOverlay {
    pub worker_pool_core_size: Option<usize>,
    pub worker_pool_max_size: Option<usize>,
    pub scheduled_task_pool_size: Option<usize>,
    pub default_retry_policy: Option<RetryPolicyConfig>,
    pub async_timeout_factor: Option<f64>,
    pub progress_persistence_throttle_ms: Option<u64>,
    pub shutdown_grace_period_secs: Option<u64>,
    pub default_run_timeout_secs: Option<u64>,
}

#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn worker_pool_core_size(mut self, v: usize) -> Self {
        self.config.worker_pool_core_size = v;
        self
    }

    pub fn worker_pool_max_size(mut self, v: usize) -> Self {
        self.config.worker_pool_max_size = v;
        self
    }

    pub fn scheduled_task_pool_size(mut self, v: usize) -> Self {
        self.config.scheduled_task_pool_size = v;
        self
    }

    pub fn default_retry_policy(mut self, v: RetryPolicyConfig) -> Self {
        self.config.default_retry_policy = Some(v);
        self
    }

    pub fn async_timeout_factor(mut self, v: f64) -> Self {
        self.config.async_timeout_factor = v;
        self
    }

    pub fn progress_persistence_throttle(mut self, v: Duration) -> Self {
        self.config.progress_persistence_throttle = v;
        self
    }

    pub fn shutdown_grace_period(mut self, v: Duration) -> Self {
        self.config.shutdown_grace_period = v;
        self
    }

    pub fn default_run_timeout(mut self, v: Duration) -> Self {
        self.config.default_run_timeout = Some(v);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
