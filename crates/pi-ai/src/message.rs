//! Message - Conversation vocabulary shared by providers and the agent
//!
//! Messages are plain values. Once a message is appended to a conversation
//! it is never mutated; corrections are modeled as new messages.

use crate::model::Model;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current Unix time in milliseconds
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Plain text block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// The text
    pub text: String,
    /// Provider signature for replaying the block verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_signature: Option<String>,
}

impl TextContent {
    /// Create a text block
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            text_signature: None,
        }
    }
}

/// Model reasoning block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingContent {
    /// The reasoning text
    pub thinking: String,
    /// Provider signature for replaying the block verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_signature: Option<String>,
}

/// Base64 image block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    /// Base64 encoded image data
    pub data: String,
    /// MIME type, e.g. `image/png`
    pub mime_type: String,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, unique within a conversation
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// Arguments as produced by the model
    pub arguments: Value,
}

impl ToolCall {
    /// Create a tool call
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Content allowed in user messages and tool results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserContent {
    /// Text
    Text(TextContent),
    /// Image
    Image(ImageContent),
}

impl UserContent {
    /// Create a text block
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextContent::new(text))
    }

    /// Text of this block, if it is a text block
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(&t.text),
            Self::Image(_) => None,
        }
    }
}

/// Content of a tool result
pub type ToolResultContent = UserContent;

/// Content produced by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssistantContent {
    /// Text
    Text(TextContent),
    /// Reasoning
    Thinking(ThinkingContent),
    /// Tool invocation
    ToolCall(ToolCall),
}

/// Cost breakdown in dollars
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageCost {
    /// Input cost
    pub input: f64,
    /// Output cost
    pub output: f64,
    /// Cache read cost
    pub cache_read: f64,
    /// Cache write cost
    pub cache_write: f64,
    /// Total cost
    pub total: f64,
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens
    pub input: u64,
    /// Output tokens
    pub output: u64,
    /// Tokens read from the prompt cache
    pub cache_read: u64,
    /// Tokens written to the prompt cache
    pub cache_write: u64,
    /// Total tokens
    pub total_tokens: u64,
    /// Cost of the request
    pub cost: UsageCost,
}

/// Why the model stopped producing output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Natural end of the response
    #[default]
    Stop,
    /// Output token limit reached
    Length,
    /// The model requested tool calls
    ToolUse,
    /// The provider failed mid-response
    Error,
    /// The request was cancelled
    Aborted,
}

impl StopReason {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolUse => "toolUse",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message written by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Ordered content blocks
    pub content: Vec<UserContent>,
    /// Unix time in milliseconds
    pub timestamp: i64,
}

impl UserMessage {
    /// Create a text-only user message stamped with the current time
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![UserContent::text(text)],
            timestamp: now_millis(),
        }
    }

    /// Attach an image
    #[must_use]
    pub fn with_image(mut self, image: ImageContent) -> Self {
        self.content.push(UserContent::Image(image));
        self
    }
}

/// Message produced by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Ordered content blocks
    pub content: Vec<AssistantContent>,
    /// Wire API that produced the message
    pub api: String,
    /// Provider that produced the message
    pub provider: String,
    /// Model identifier
    pub model: String,
    /// Token usage
    #[serde(default)]
    pub usage: Usage,
    /// Why generation stopped
    pub stop_reason: StopReason,
    /// Error description when `stop_reason` is `error` or `aborted`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unix time in milliseconds
    pub timestamp: i64,
}

impl AssistantMessage {
    /// Create an empty message attributed to `model`
    #[must_use]
    pub fn new(model: &Model) -> Self {
        Self {
            content: Vec::new(),
            api: model.api.clone(),
            provider: model.provider.clone(),
            model: model.id.clone(),
            usage: Usage::default(),
            stop_reason: StopReason::Stop,
            error_message: None,
            timestamp: now_millis(),
        }
    }

    /// Append a text block
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content.push(AssistantContent::Text(TextContent::new(text)));
        self
    }

    /// Append a reasoning block
    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.content.push(AssistantContent::Thinking(ThinkingContent {
            thinking: thinking.into(),
            thinking_signature: None,
        }));
        self
    }

    /// Append a tool call and mark the message as requesting tools
    #[must_use]
    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.content.push(AssistantContent::ToolCall(call));
        self.stop_reason = StopReason::ToolUse;
        self
    }

    /// Set the stop reason
    #[must_use]
    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.stop_reason = stop_reason;
        self
    }

    /// Set the error message
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Tool calls in issuance order
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Concatenated text blocks
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether the message ended in a provider failure or cancellation
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.stop_reason, StopReason::Error | StopReason::Aborted)
    }
}

/// Result of a tool call, fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    /// Identifier of the call this result answers
    pub tool_call_id: String,
    /// Name of the tool that ran
    pub tool_name: String,
    /// Ordered content blocks
    pub content: Vec<ToolResultContent>,
    /// Structured details for UIs and logs, not sent to the model
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
    /// Whether the call failed
    pub is_error: bool,
    /// Unix time in milliseconds
    pub timestamp: i64,
}

impl ToolResultMessage {
    /// Concatenated text blocks
    #[must_use]
    pub fn text(&self) -> String {
        self.content.iter().filter_map(UserContent::as_text).collect()
    }
}

/// A conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum Message {
    /// From the user
    User(UserMessage),
    /// From the model
    Assistant(AssistantMessage),
    /// Result of a tool call
    ToolResult(ToolResultMessage),
}

impl Message {
    /// Create a text-only user message
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage::text(text))
    }

    /// Role tag as serialized
    #[must_use]
    pub fn role(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::ToolResult(_) => "toolResult",
        }
    }

    /// Unix time in milliseconds
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::User(m) => m.timestamp,
            Self::Assistant(m) => m.timestamp,
            Self::ToolResult(m) => m.timestamp,
        }
    }

    /// Borrow as an assistant message
    #[must_use]
    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow as a tool result
    #[must_use]
    pub fn as_tool_result(&self) -> Option<&ToolResultMessage> {
        match self {
            Self::ToolResult(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::user(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::user(text)
    }
}

impl From<UserMessage> for Message {
    fn from(message: UserMessage) -> Self {
        Self::User(message)
    }
}

impl From<AssistantMessage> for Message {
    fn from(message: AssistantMessage) -> Self {
        Self::Assistant(message)
    }
}

impl From<ToolResultMessage> for Message {
    fn from(message: ToolResultMessage) -> Self {
        Self::ToolResult(message)
    }
}
