//! Stream - Contract between the agent and a model provider
//!
//! A provider turns a [`Context`] into an [`AssistantMessageEventStream`]:
//! a sequence of incremental [`AssistantMessageEvent`]s that ends with a
//! complete [`AssistantMessage`].

use crate::error::Result;
use crate::event_stream::EventStream;
use crate::message::{AssistantMessage, Message, StopReason, ToolCall};
use crate::model::{Model, ThinkingLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Why a successful stream finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DoneReason {
    /// Natural end
    Stop,
    /// Token limit
    Length,
    /// Tool calls requested
    ToolUse,
}

impl From<DoneReason> for StopReason {
    fn from(reason: DoneReason) -> Self {
        match reason {
            DoneReason::Stop => StopReason::Stop,
            DoneReason::Length => StopReason::Length,
            DoneReason::ToolUse => StopReason::ToolUse,
        }
    }
}

/// Why a stream failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorReason {
    /// Cancelled by the caller
    Aborted,
    /// Provider failure
    Error,
}

/// Incremental event emitted while a model response streams in.
///
/// Every non-terminal event carries the accumulated `partial` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantMessageEvent {
    /// Response started
    Start {
        /// Empty message with provider metadata
        partial: AssistantMessage,
    },
    /// A text block started
    TextStart {
        /// Index of the block in `partial.content`
        content_index: usize,
        /// Accumulated message
        partial: AssistantMessage,
    },
    /// Text appended to a block
    TextDelta {
        /// Index of the block in `partial.content`
        content_index: usize,
        /// Appended text
        delta: String,
        /// Accumulated message
        partial: AssistantMessage,
    },
    /// A text block finished
    TextEnd {
        /// Index of the block in `partial.content`
        content_index: usize,
        /// Complete block text
        content: String,
        /// Accumulated message
        partial: AssistantMessage,
    },
    /// A reasoning block started
    ThinkingStart {
        /// Index of the block in `partial.content`
        content_index: usize,
        /// Accumulated message
        partial: AssistantMessage,
    },
    /// Reasoning appended to a block
    ThinkingDelta {
        /// Index of the block in `partial.content`
        content_index: usize,
        /// Appended reasoning
        delta: String,
        /// Accumulated message
        partial: AssistantMessage,
    },
    /// A reasoning block finished
    ThinkingEnd {
        /// Index of the block in `partial.content`
        content_index: usize,
        /// Complete block text
        content: String,
        /// Accumulated message
        partial: AssistantMessage,
    },
    /// A tool call started
    #[serde(rename = "toolcall_start")]
    ToolCallStart {
        /// Index of the block in `partial.content`
        content_index: usize,
        /// Accumulated message
        partial: AssistantMessage,
    },
    /// Raw argument JSON appended to a tool call
    #[serde(rename = "toolcall_delta")]
    ToolCallDelta {
        /// Index of the block in `partial.content`
        content_index: usize,
        /// Appended argument text
        delta: String,
        /// Accumulated message
        partial: AssistantMessage,
    },
    /// A tool call finished
    #[serde(rename = "toolcall_end")]
    ToolCallEnd {
        /// Index of the block in `partial.content`
        content_index: usize,
        /// The parsed call
        tool_call: ToolCall,
        /// Accumulated message
        partial: AssistantMessage,
    },
    /// Response completed
    Done {
        /// Why it finished
        reason: DoneReason,
        /// Final message
        message: AssistantMessage,
    },
    /// Response failed
    Error {
        /// Why it failed
        reason: ErrorReason,
        /// Final message with `error_message` set
        error: AssistantMessage,
    },
}

impl AssistantMessageEvent {
    /// Accumulated message carried by a non-terminal event
    #[must_use]
    pub fn partial(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Start { partial }
            | Self::TextStart { partial, .. }
            | Self::TextDelta { partial, .. }
            | Self::TextEnd { partial, .. }
            | Self::ThinkingStart { partial, .. }
            | Self::ThinkingDelta { partial, .. }
            | Self::ThinkingEnd { partial, .. }
            | Self::ToolCallStart { partial, .. }
            | Self::ToolCallDelta { partial, .. }
            | Self::ToolCallEnd { partial, .. } => Some(partial),
            Self::Done { .. } | Self::Error { .. } => None,
        }
    }

    /// Final message carried by a terminal event
    #[must_use]
    pub fn final_message(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Done { message, .. } => Some(message),
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether this is `done` or `error`
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.final_message().is_some()
    }
}

/// Event stream of one model response
pub type AssistantMessageEventStream = EventStream<AssistantMessageEvent, AssistantMessage>;

/// Tool description sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// What the tool does
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: serde_json::Value,
}

/// Everything the model sees for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// System prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Conversation history
    pub messages: Vec<Message>,
    /// Available tools
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Output token limit
    pub max_tokens: Option<u32>,
    /// API key override
    pub api_key: Option<String>,
    /// Session identifier for provider-side caching
    pub session_id: Option<String>,
    /// Extra request headers
    pub headers: HashMap<String, String>,
    /// Requested reasoning effort
    pub reasoning: Option<ThinkingLevel>,
    /// Upper bound for provider-requested retry delays
    pub max_retry_delay_ms: Option<u64>,
    /// Cooperative cancellation
    pub cancel: CancellationToken,
}

/// Model-streaming collaborator
#[async_trait]
pub trait ModelStreamer: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Start streaming a response.
    ///
    /// An `Err` means the request never started. Failures after the stream
    /// has started are reported through an `Error` event instead.
    async fn stream(
        &self,
        model: &Model,
        context: Context,
        options: StreamOptions,
    ) -> Result<AssistantMessageEventStream>;
}
