//! Agent events and run outcomes
//!
//! Events are the only contract a UI or logger needs: every lifecycle
//! transition of a run is reported here, in emission order.

use crate::tool::AgentToolResult;
use pi_ai::{AssistantMessage, AssistantMessageEvent, EventStream, Message, ToolResultMessage};
use serde::Serialize;
use serde_json::Value;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndStatus {
    /// The model produced a final answer
    Completed,
    /// A provider or hook failure ended the run
    Failed,
    /// The caller aborted the run
    Aborted,
}

impl EndStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

/// Event emitted while an agent run progresses
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A run started
    AgentStart,
    /// A run ended; always the last event of a run
    AgentEnd {
        /// How the run ended
        status: EndStatus,
        /// Messages added to the conversation by this run
        messages: Vec<Message>,
    },
    /// A turn started
    TurnStart {
        /// One-based turn number within the run
        turn: u32,
    },
    /// A turn ended
    TurnEnd {
        /// One-based turn number within the run
        turn: u32,
        /// The assistant message of this turn
        message: AssistantMessage,
        /// Tool results produced in this turn, in issuance order
        tool_results: Vec<ToolResultMessage>,
    },
    /// A message started; for user and tool messages it is already complete
    MessageStart {
        /// Message so far
        message: Message,
    },
    /// An assistant message grew
    MessageUpdate {
        /// Accumulated message
        message: AssistantMessage,
        /// The provider event that caused the update
        assistant_message_event: AssistantMessageEvent,
    },
    /// A message was committed to the conversation
    MessageEnd {
        /// Final message
        message: Message,
    },
    /// A tool call started
    ToolExecutionStart {
        /// Call identifier
        tool_call_id: String,
        /// Tool name
        tool_name: String,
        /// Arguments from the model
        args: Value,
    },
    /// A tool reported progress
    ToolExecutionUpdate {
        /// Call identifier
        tool_call_id: String,
        /// Tool name
        tool_name: String,
        /// Arguments from the model
        args: Value,
        /// Partial output
        partial_result: AgentToolResult,
    },
    /// A tool call settled
    ToolExecutionEnd {
        /// Call identifier
        tool_call_id: String,
        /// Tool name
        tool_name: String,
        /// Final output
        result: AgentToolResult,
        /// Whether the call failed, timed out or was cancelled
        is_error: bool,
    },
    /// The run failed; followed by `AgentEnd`
    Error {
        /// Failure description
        message: String,
    },
}

impl AgentEvent {
    /// Event type tag as serialized
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentStart => "agent_start",
            Self::AgentEnd { .. } => "agent_end",
            Self::TurnStart { .. } => "turn_start",
            Self::TurnEnd { .. } => "turn_end",
            Self::MessageStart { .. } => "message_start",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageEnd { .. } => "message_end",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionUpdate { .. } => "tool_execution_update",
            Self::ToolExecutionEnd { .. } => "tool_execution_end",
            Self::Error { .. } => "error",
        }
    }
}

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The model produced a message without tool calls and no queue was pending
    Completed {
        /// Final assistant message
        message: AssistantMessage,
        /// Messages added by this run
        new_messages: Vec<Message>,
    },
    /// The run failed
    Failed {
        /// Failure description
        error: String,
        /// Messages added by this run before the failure
        new_messages: Vec<Message>,
    },
    /// The run was aborted
    Aborted {
        /// Messages committed before the abort
        new_messages: Vec<Message>,
    },
}

impl RunOutcome {
    /// End status of this outcome
    #[must_use]
    pub fn status(&self) -> EndStatus {
        match self {
            Self::Completed { .. } => EndStatus::Completed,
            Self::Failed { .. } => EndStatus::Failed,
            Self::Aborted { .. } => EndStatus::Aborted,
        }
    }

    /// Messages added by the run
    #[must_use]
    pub fn new_messages(&self) -> &[Message] {
        match self {
            Self::Completed { new_messages, .. }
            | Self::Failed { new_messages, .. }
            | Self::Aborted { new_messages } => new_messages,
        }
    }

    /// Final assistant message of a completed run
    #[must_use]
    pub fn message(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Completed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Failure description of a failed run
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether the run completed normally
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Whether the run was aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Event stream of one run
pub type AgentEventStream = EventStream<AgentEvent, RunOutcome>;
