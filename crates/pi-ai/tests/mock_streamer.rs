//! Scripted streamer behavior as seen through the streaming contract

use pi_ai::{
    AssistantMessage, AssistantMessageEvent, Context, Error, ErrorReason, Message, MockResponse,
    MockStreamer, Model, ModelStreamer, StopReason, StreamItem, StreamOptions, ToolCall,
};
use serde_json::json;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn model() -> Model {
    Model::new("mock-model", "mock", "mock-api")
}

fn context(text: &str) -> Context {
    Context {
        system_prompt: Some("Be brief.".to_string()),
        messages: vec![Message::user(text)],
        tools: Vec::new(),
    }
}

async fn collect(
    stream: pi_ai::AssistantMessageEventStream,
) -> (Vec<AssistantMessageEvent>, AssistantMessage) {
    let mut events = stream.events();
    let mut collected = Vec::new();
    while let Some(item) = events.next().await {
        match item {
            StreamItem::Event(event) => collected.push(event),
            StreamItem::End(message) => return (collected, message),
        }
    }
    panic!("stream ended without a final message");
}

#[tokio::test]
async fn test_script_replays_in_order() {
    let streamer = MockStreamer::with_responses([
        MockResponse::Message(AssistantMessage::new(&model()).with_text("first")),
        MockResponse::Message(
            AssistantMessage::new(&model())
                .with_tool_call(ToolCall::new("call_1", "echo", json!({"x": 1}))),
        ),
    ]);

    let first = assert_ok!(
        streamer
            .stream(&model(), context("one"), StreamOptions::default())
            .await
    );
    let (_, message) = collect(first).await;
    assert_eq!(message.text(), "first");

    let second = assert_ok!(
        streamer
            .stream(&model(), context("two"), StreamOptions::default())
            .await
    );
    let (events, message) = collect(second).await;
    assert_eq!(message.stop_reason, StopReason::ToolUse);
    assert!(matches!(
        events.last(),
        Some(AssistantMessageEvent::Done { .. })
    ));

    assert_eq!(streamer.call_count(), 2);
    assert_eq!(streamer.remaining(), 0);
    let recorded = streamer.calls();
    assert_eq!(recorded[0].system_prompt.as_deref(), Some("Be brief."));
    assert_eq!(recorded[1].messages.len(), 1);
    match &recorded[1].messages[0] {
        Message::User(user) => assert_eq!(user.content[0].as_text(), Some("two")),
        other => panic!("expected a user message, got {}", other.role()),
    }
}

#[tokio::test]
async fn test_late_subscriber_sees_remaining_events() {
    let streamer = MockStreamer::with_responses([MockResponse::Message(
        AssistantMessage::new(&model())
            .with_text("a")
            .with_text("b"),
    )])
    .with_event_delay(Duration::from_millis(5));

    let stream = assert_ok!(
        streamer
            .stream(&model(), context("hi"), StreamOptions::default())
            .await
    );
    let mut late = stream.subscribe();

    let (primary, message) = collect(stream.clone()).await;
    let mut observed = 0;
    while let Some(item) = late.next().await {
        match item {
            StreamItem::Event(_) => observed += 1,
            StreamItem::End(end) => {
                assert_eq!(end, message);
                break;
            }
        }
    }
    assert!(observed <= primary.len());
    assert!(observed > 0);
    assert_eq!(message.text(), "ab");
}

#[tokio::test]
async fn test_failure_is_returned_before_streaming() {
    let streamer = MockStreamer::with_responses([MockResponse::Fail(Error::RateLimit {
        retry_after_ms: Some(250),
    })]);

    let err = assert_err!(
        streamer
            .stream(&model(), context("hi"), StreamOptions::default())
            .await
    );
    assert!(err.is_transient());
    assert_eq!(err.retry_after(), Some(Duration::from_millis(250)));
}

#[tokio::test]
async fn test_hang_ends_with_aborted_error_on_cancel() {
    let streamer = MockStreamer::with_responses([MockResponse::Hang]);
    let cancel = CancellationToken::new();
    let options = StreamOptions {
        cancel: cancel.clone(),
        ..StreamOptions::default()
    };

    let stream = assert_ok!(streamer.stream(&model(), context("wait"), options).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!stream.is_done());

    cancel.cancel();
    let (events, message) = collect(stream).await;

    assert!(matches!(
        events.first(),
        Some(AssistantMessageEvent::Start { .. })
    ));
    assert!(matches!(
        events.last(),
        Some(AssistantMessageEvent::Error {
            reason: ErrorReason::Aborted,
            ..
        })
    ));
    assert_eq!(message.stop_reason, StopReason::Aborted);
}

#[tokio::test]
async fn test_event_delay_can_be_cancelled() {
    let streamer = MockStreamer::with_responses([MockResponse::Message(
        AssistantMessage::new(&model()).with_text("slow answer"),
    )])
    .with_event_delay(Duration::from_millis(200));
    let cancel = CancellationToken::new();
    let options = StreamOptions {
        cancel: cancel.clone(),
        ..StreamOptions::default()
    };

    let stream = assert_ok!(streamer.stream(&model(), context("hi"), options).await);
    cancel.cancel();

    let message = assert_ok!(stream.result().await);
    assert_eq!(message.stop_reason, StopReason::Aborted);
    assert_eq!(message.error_message.as_deref(), Some("Request was aborted"));
}
