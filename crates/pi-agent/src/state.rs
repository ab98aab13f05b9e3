//! Agent state
//!
//! The configuration and conversation owned by one [`Agent`](crate::Agent).

use crate::tool::ToolRegistry;
use pi_ai::{Message, Model, ThinkingLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Run status of an agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run is active
    #[default]
    Idle,
    /// A run is active
    Running,
    /// Abort was signaled and the run is winding down
    Aborting,
}

impl RunStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Aborting => "aborting",
        }
    }

    /// Whether a run is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of an agent's configuration and conversation
#[derive(Debug, Clone)]
pub struct AgentState {
    /// System prompt
    pub system_prompt: String,
    /// Model the agent talks to
    pub model: Model,
    /// Requested reasoning effort
    pub thinking_level: ThinkingLevel,
    /// Registered tools
    pub tools: Arc<ToolRegistry>,
    /// Conversation history
    pub messages: Vec<Message>,
    /// Run status
    pub status: RunStatus,
    /// Message currently streaming in, if any
    pub stream_message: Option<Message>,
    /// Tool calls started but not yet settled
    pub pending_tool_calls: HashSet<String>,
    /// Failure of the last run
    pub error: Option<String>,
}

impl AgentState {
    /// Fresh idle state with an empty conversation
    #[must_use]
    pub fn new(model: Model) -> Self {
        Self {
            system_prompt: String::new(),
            model,
            thinking_level: ThinkingLevel::Off,
            tools: Arc::new(ToolRegistry::new()),
            messages: Vec::new(),
            status: RunStatus::Idle,
            stream_message: None,
            pending_tool_calls: HashSet::new(),
            error: None,
        }
    }

    /// Whether a run is active
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.status.is_active()
    }
}
