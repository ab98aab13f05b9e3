//! Mock model streamer for testing
//!
//! Replays a script of responses as realistic event sequences and records
//! every context it was asked to answer.

use crate::error::{Error, Result};
use crate::message::{
    AssistantContent, AssistantMessage, StopReason, TextContent, ThinkingContent, ToolCall,
};
use crate::model::Model;
use crate::stream::{
    AssistantMessageEvent, AssistantMessageEventStream, Context, DoneReason, ErrorReason,
    ModelStreamer, StreamOptions,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One scripted answer
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Stream this message block by block
    Message(AssistantMessage),
    /// Refuse to start the request
    Fail(Error),
    /// Start a response and never finish it until cancelled
    Hang,
}

impl From<AssistantMessage> for MockResponse {
    fn from(message: AssistantMessage) -> Self {
        Self::Message(message)
    }
}

/// A model streamer that replays queued responses
#[derive(Clone, Default)]
pub struct MockStreamer {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    calls: Arc<Mutex<Vec<Context>>>,
    api_keys: Arc<Mutex<Vec<Option<String>>>>,
    event_delay: Option<Duration>,
}

impl std::fmt::Debug for MockStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStreamer")
            .field("remaining", &self.remaining())
            .field("calls", &self.call_count())
            .finish()
    }
}

impl MockStreamer {
    /// Create a mock with an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock with the given script
    #[must_use]
    pub fn with_responses(responses: impl IntoIterator<Item = MockResponse>) -> Self {
        let mock = Self::new();
        for response in responses {
            mock.push(response);
        }
        mock
    }

    /// Pause between streamed events
    #[must_use]
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    /// Append a response to the script
    pub fn push(&self, response: impl Into<MockResponse>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response.into());
    }

    /// Contexts received so far, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<Context> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// API key passed with each request, oldest first
    #[must_use]
    pub fn api_keys(&self) -> Vec<Option<String>> {
        self.api_keys.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `stream` calls so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Responses not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ModelStreamer for MockStreamer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        model: &Model,
        context: Context,
        options: StreamOptions,
    ) -> Result<AssistantMessageEventStream> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(context);
        self.api_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(options.api_key.clone());

        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let response = next.unwrap_or_else(|| {
            MockResponse::Message(AssistantMessage::new(model).with_text("mock response"))
        });

        let stream = AssistantMessageEventStream::new();
        match response {
            MockResponse::Fail(err) => {
                debug!(error = %err, "Mock streamer refusing request");
                return Err(err);
            }
            MockResponse::Message(message) => {
                tokio::spawn(replay(
                    stream.clone(),
                    message,
                    self.event_delay,
                    options.cancel,
                ));
            }
            MockResponse::Hang => {
                tokio::spawn(hang(stream.clone(), AssistantMessage::new(model), options.cancel));
            }
        }
        Ok(stream)
    }
}

/// Break a finished message into the events a provider would emit
#[must_use]
pub fn script_events(message: &AssistantMessage) -> Vec<AssistantMessageEvent> {
    let mut partial = message.clone();
    partial.content.clear();
    partial.error_message = None;

    let mut events = vec![AssistantMessageEvent::Start {
        partial: partial.clone(),
    }];

    for (content_index, block) in message.content.iter().enumerate() {
        match block {
            AssistantContent::Text(text) => {
                partial
                    .content
                    .push(AssistantContent::Text(TextContent::new("")));
                events.push(AssistantMessageEvent::TextStart {
                    content_index,
                    partial: partial.clone(),
                });
                partial.content[content_index] = block.clone();
                events.push(AssistantMessageEvent::TextDelta {
                    content_index,
                    delta: text.text.clone(),
                    partial: partial.clone(),
                });
                events.push(AssistantMessageEvent::TextEnd {
                    content_index,
                    content: text.text.clone(),
                    partial: partial.clone(),
                });
            }
            AssistantContent::Thinking(thinking) => {
                partial
                    .content
                    .push(AssistantContent::Thinking(ThinkingContent {
                        thinking: String::new(),
                        thinking_signature: None,
                    }));
                events.push(AssistantMessageEvent::ThinkingStart {
                    content_index,
                    partial: partial.clone(),
                });
                partial.content[content_index] = block.clone();
                events.push(AssistantMessageEvent::ThinkingDelta {
                    content_index,
                    delta: thinking.thinking.clone(),
                    partial: partial.clone(),
                });
                events.push(AssistantMessageEvent::ThinkingEnd {
                    content_index,
                    content: thinking.thinking.clone(),
                    partial: partial.clone(),
                });
            }
            AssistantContent::ToolCall(call) => {
                partial.content.push(AssistantContent::ToolCall(ToolCall::new(
                    call.id.clone(),
                    call.name.clone(),
                    serde_json::Value::Object(serde_json::Map::new()),
                )));
                events.push(AssistantMessageEvent::ToolCallStart {
                    content_index,
                    partial: partial.clone(),
                });
                partial.content[content_index] = block.clone();
                events.push(AssistantMessageEvent::ToolCallDelta {
                    content_index,
                    delta: call.arguments.to_string(),
                    partial: partial.clone(),
                });
                events.push(AssistantMessageEvent::ToolCallEnd {
                    content_index,
                    tool_call: call.clone(),
                    partial: partial.clone(),
                });
            }
        }
    }

    let terminal = match message.stop_reason {
        StopReason::Error => AssistantMessageEvent::Error {
            reason: ErrorReason::Error,
            error: message.clone(),
        },
        StopReason::Aborted => AssistantMessageEvent::Error {
            reason: ErrorReason::Aborted,
            error: message.clone(),
        },
        StopReason::Length => AssistantMessageEvent::Done {
            reason: DoneReason::Length,
            message: message.clone(),
        },
        StopReason::ToolUse => AssistantMessageEvent::Done {
            reason: DoneReason::ToolUse,
            message: message.clone(),
        },
        StopReason::Stop => AssistantMessageEvent::Done {
            reason: DoneReason::Stop,
            message: message.clone(),
        },
    };
    events.push(terminal);
    events
}

fn aborted(mut partial: AssistantMessage) -> AssistantMessage {
    partial.stop_reason = StopReason::Aborted;
    partial.error_message = Some("Request was aborted".to_string());
    partial
}

fn finish_aborted(stream: &AssistantMessageEventStream, partial: AssistantMessage) {
    let error = aborted(partial);
    let _ = stream.push(AssistantMessageEvent::Error {
        reason: ErrorReason::Aborted,
        error: error.clone(),
    });
    let _ = stream.end(error);
}

async fn replay(
    stream: AssistantMessageEventStream,
    message: AssistantMessage,
    delay: Option<Duration>,
    cancel: CancellationToken,
) {
    let mut partial = AssistantMessage {
        content: Vec::new(),
        ..message.clone()
    };

    for event in script_events(&message) {
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => {
                    finish_aborted(&stream, partial);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            finish_aborted(&stream, partial);
            return;
        }

        if let Some(p) = event.partial() {
            partial = p.clone();
        }
        let _ = stream.push(event);
    }

    let _ = stream.end(message);
}

async fn hang(
    stream: AssistantMessageEventStream,
    partial: AssistantMessage,
    cancel: CancellationToken,
) {
    let _ = stream.push(AssistantMessageEvent::Start {
        partial: partial.clone(),
    });
    cancel.cancelled().await;
    finish_aborted(&stream, partial);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_stream::StreamItem;
    use serde_json::json;

    fn model() -> Model {
        Model::new("mock-model", "mock", "mock-api")
    }

    #[test]
    fn test_script_events_for_tool_call() {
        let message = AssistantMessage::new(&model())
            .with_text("let me check")
            .with_tool_call(ToolCall::new("call_1", "echo", json!({"x": 1})));

        let events = script_events(&message);
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                AssistantMessageEvent::Start { .. } => "start",
                AssistantMessageEvent::TextStart { .. } => "text_start",
                AssistantMessageEvent::TextDelta { .. } => "text_delta",
                AssistantMessageEvent::TextEnd { .. } => "text_end",
                AssistantMessageEvent::ToolCallStart { .. } => "toolcall_start",
                AssistantMessageEvent::ToolCallDelta { .. } => "toolcall_delta",
                AssistantMessageEvent::ToolCallEnd { .. } => "toolcall_end",
                AssistantMessageEvent::Done { .. } => "done",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "start",
                "text_start",
                "text_delta",
                "text_end",
                "toolcall_start",
                "toolcall_delta",
                "toolcall_end",
                "done"
            ]
        );
        match events.last() {
            Some(AssistantMessageEvent::Done { reason, message: m }) => {
                assert_eq!(*reason, DoneReason::ToolUse);
                assert_eq!(m, &message);
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_replays_message_and_records_context() {
        let mock = MockStreamer::with_responses(vec![MockResponse::Message(
            AssistantMessage::new(&model()).with_text("4"),
        )]);
        let context = Context {
            system_prompt: Some("be brief".into()),
            ..Context::default()
        };

        let stream = mock
            .stream(&model(), context.clone(), StreamOptions::default())
            .await
            .unwrap();
        let result = stream.result().await.unwrap();
        assert_eq!(result.text(), "4");
        assert_eq!(mock.calls(), vec![context]);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_mock_failure_is_returned() {
        let mock = MockStreamer::with_responses(vec![MockResponse::Fail(Error::Network(
            "connection reset".into(),
        ))]);
        let err = mock
            .stream(&model(), Context::default(), StreamOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_hang_aborts_on_cancel() {
        let mock = MockStreamer::with_responses(vec![MockResponse::Hang]);
        let options = StreamOptions::default();
        let cancel = options.cancel.clone();

        let stream = mock
            .stream(&model(), Context::default(), options)
            .await
            .unwrap();
        let mut events = stream.events();
        assert!(matches!(
            events.next().await,
            Some(StreamItem::Event(AssistantMessageEvent::Start { .. }))
        ));

        cancel.cancel();
        let result = stream.result().await.unwrap();
        assert_eq!(result.stop_reason, StopReason::Aborted);
    }

    #[tokio::test]
    async fn test_empty_script_answers_default() {
        let mock = MockStreamer::new();
        let stream = mock
            .stream(&model(), Context::default(), StreamOptions::default())
            .await
            .unwrap();
        assert_eq!(stream.result().await.unwrap().text(), "mock response");
    }
}
