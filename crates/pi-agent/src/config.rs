//! Agent configuration
//!
//! Runtime limits and queue policy, loaded in layers:
//! 1. embedded defaults (`config/default.toml`)
//! 2. the user file under the platform config directory
//! 3. `config/local` in the working directory
//! 4. `PI_AGENT_*` environment variables, `__` separating nested keys

use crate::error::Result;
use crate::executor::DEFAULT_CANCEL_GRACE;
use crate::queue::QueueMode;
use crate::retry::RetryConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Embedded default configuration
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable prefix
pub const ENV_PREFIX: &str = "PI_AGENT";

/// Runtime configuration of an [`Agent`](crate::Agent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Drain policy of the steering queue
    #[serde(default)]
    pub steering_mode: QueueMode,
    /// Drain policy of the follow-up queue
    #[serde(default)]
    pub follow_up_mode: QueueMode,
    /// Provider retry policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Idle timeout between model stream events; 0 disables it
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    /// Limit for one tool call; 0 disables it
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    /// Grace period for cancelled tools
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_llm_timeout_ms() -> u64 {
    120_000
}

fn default_tool_timeout_ms() -> u64 {
    60_000
}

fn default_cancel_grace_ms() -> u64 {
    DEFAULT_CANCEL_GRACE.as_millis() as u64
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            steering_mode: QueueMode::default(),
            follow_up_mode: QueueMode::default(),
            retry: RetryConfig::default(),
            llm_timeout_ms: default_llm_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from all layers
    pub fn load() -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(dir) = dirs::config_dir() {
            let user_file = dir.join("pi-agent").join("config");
            debug!(path = %user_file.display(), "Looking for user configuration");
            builder = builder.add_source(File::from(user_file).required(false));
        }

        let config = builder
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from one file on top of the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from(path.as_ref()))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Idle timeout between stream events
    #[must_use]
    pub fn llm_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.llm_timeout_ms)
    }

    /// Limit for one tool call
    #[must_use]
    pub fn tool_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.tool_timeout_ms)
    }

    /// Grace period for cancelled tools
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
