//! Pi AI - Model-facing vocabulary and streaming contract
//!
//! This crate provides the pieces shared by model providers and the agent runtime:
//! - Message: user, assistant and tool-result messages with their content blocks
//! - Model: model descriptor and thinking levels
//! - EventStream: multi-subscriber push stream with a single terminal result
//! - Stream: incremental model events and the `ModelStreamer` trait
//! - Mock: scripted streamer for tests and demos

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod event_stream;
pub mod message;
pub mod mock;
pub mod model;
pub mod stream;

pub use error::{Error, Result};
pub use event_stream::{EventStream, StreamItem, Subscription};
pub use message::{
    now_millis, AssistantContent, AssistantMessage, ImageContent, Message, StopReason,
    TextContent, ThinkingContent, ToolCall, ToolResultContent, ToolResultMessage, Usage,
    UsageCost, UserContent, UserMessage,
};
pub use mock::{MockResponse, MockStreamer};
pub use model::{Model, ThinkingLevel};
pub use stream::{
    AssistantMessageEvent, AssistantMessageEventStream, Context, DoneReason, ErrorReason,
    ModelStreamer, StreamOptions, ToolSpec,
};
