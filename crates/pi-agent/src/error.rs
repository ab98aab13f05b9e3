//! Error types for pi-agent

use crate::retry::RetryError;
use thiserror::Error;

/// Agent error type
#[derive(Debug, Error)]
pub enum Error {
    /// The model provider failed and retries did not help
    #[error("provider error: {0}")]
    Provider(#[from] RetryError),

    /// The model asked for a tool that is not registered
    #[error("tool {0} not found")]
    UnknownTool(String),

    /// A tool failed; reported as an error-flagged result, never propagated
    #[error("{message}")]
    ToolExecution {
        /// Tool name
        tool: String,
        /// Failure description shown to the model
        message: String,
    },

    /// Tool arguments did not match the declared schema
    #[error("parameter validation failed: {}", .errors.join(", "))]
    ToolValidation {
        /// Tool name
        tool: String,
        /// One entry per violation
        errors: Vec<String>,
    },

    /// A run is already active on this agent
    #[error(
        "agent is already processing a prompt; use steer() or follow_up() to queue messages, or wait for completion"
    )]
    AlreadyRunning,

    /// Posting to a stream that already ended
    #[error("event stream closed")]
    StreamClosed,

    /// Operation is not valid for the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A context hook failed
    #[error("context transform failed: {0}")]
    Transform(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Build a tool failure
    #[must_use]
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
