//! Pi Runtime - process bootstrap for the agent runtime
//!
//! Re-exports [`pi_ai`] and [`pi_agent`] and wires up the ambient pieces a
//! host process needs before creating agents:
//! - `.env` loading
//! - tracing subscriber installation
//! - layered configuration loading

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use pi_agent;
pub use pi_ai;

pub use pi_agent::{Agent, AgentConfig, AgentEvent, AgentOptions, RunOutcome};

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "pi_agent=info,pi_ai=info";

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Install the global tracing subscriber with human-readable output
pub fn init_tracing() -> Result<()> {
    init_tracing_with(LogFormat::Pretty)
}

/// Install the global tracing subscriber.
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing_with(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .context("Failed to install tracing subscriber")
}

/// Load variables from a `.env` file, if one exists
pub fn load_env() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Load the layered agent configuration
pub fn load_config() -> Result<AgentConfig> {
    AgentConfig::load().context("Failed to load agent configuration")
}

/// Load `.env`, install tracing and load the configuration
pub fn bootstrap() -> Result<AgentConfig> {
    let env_file = load_env();
    init_tracing()?;
    if let Some(path) = env_file {
        debug!(path = %path.display(), "Loaded environment file");
    }

    let config = load_config()?;
    info!(
        steering_mode = ?config.steering_mode,
        follow_up_mode = ?config.follow_up_mode,
        max_retries = config.retry.max_retries,
        "Agent runtime configured"
    );
    Ok(config)
}
