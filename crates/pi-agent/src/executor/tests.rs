use super::*;
use crate::tool::{FnTool, MockAgentTool, ToolDefinition, ToolInvocation};
use pi_ai::StreamItem;
use serde_json::json;

fn sleep_tool() -> Arc<dyn AgentTool> {
    Arc::new(FnTool::new(
        ToolDefinition::new("sleep", "Sleep, then echo the tag"),
        |invocation: ToolInvocation| async move {
            let ms = invocation.args["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let tag = invocation.args["tag"].as_str().unwrap_or_default().to_string();
            Ok(AgentToolResult::text(tag))
        },
    ))
}

fn stubborn_tool() -> Arc<dyn AgentTool> {
    Arc::new(FnTool::new(
        ToolDefinition::new("stubborn", "Ignores cancellation"),
        |_invocation: ToolInvocation| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(AgentToolResult::text("finally"))
        },
    ))
}

fn polite_tool() -> Arc<dyn AgentTool> {
    Arc::new(FnTool::new(
        ToolDefinition::new("polite", "Stops when cancelled"),
        |invocation: ToolInvocation| async move {
            invocation.cancel.cancelled().await;
            Ok(AgentToolResult::text("stopped early"))
        },
    ))
}

fn collect(events: &AgentEventStream) -> Vec<AgentEvent> {
    let mut subscription = events.events();
    let mut collected = Vec::new();
    while let Some(StreamItem::Event(event)) = subscription.try_next() {
        collected.push(event);
    }
    collected
}

fn executor(tools: Vec<Arc<dyn AgentTool>>) -> ToolExecutor {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    ToolExecutor::new(Arc::new(registry))
}

#[tokio::test]
async fn test_results_follow_issuance_order() {
    let executor = executor(vec![sleep_tool()]);
    let calls = vec![
        ToolCall::new("a", "sleep", json!({"ms": 120, "tag": "a"})),
        ToolCall::new("b", "sleep", json!({"ms": 10, "tag": "b"})),
        ToolCall::new("c", "sleep", json!({"ms": 60, "tag": "c"})),
    ];
    let events = AgentEventStream::new();

    let results = executor
        .execute(&calls, &CancellationToken::new(), &events)
        .await;

    let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(results[0].text(), "a");

    let collected = collect(&events);
    let starts: Vec<_> = collected
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolExecutionStart { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec!["a", "b", "c"]);

    let ends: Vec<_> = collected
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolExecutionEnd { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(ends, vec!["b", "c", "a"]);
}

#[tokio::test]
async fn test_calls_run_concurrently() {
    let executor = executor(vec![sleep_tool()]);
    let calls: Vec<_> = (0..4)
        .map(|i| ToolCall::new(format!("call_{i}"), "sleep", json!({"ms": 200, "tag": "x"})))
        .collect();

    let started = Instant::now();
    let results = executor
        .execute(&calls, &CancellationToken::new(), &AgentEventStream::new())
        .await;

    assert_eq!(results.len(), 4);
    assert!(started.elapsed() < Duration::from_millis(700));
}

#[tokio::test]
async fn test_failure_is_isolated() {
    let mut failing = MockAgentTool::new();
    failing
        .expect_definition()
        .return_const(ToolDefinition::new("flaky", "Always fails"));
    failing
        .expect_execute()
        .times(1)
        .returning(|_, _, _, _| Err(Error::tool("flaky", "disk full")));

    let executor = executor(vec![Arc::new(failing), sleep_tool()]);
    let calls = vec![
        ToolCall::new("1", "flaky", json!({})),
        ToolCall::new("2", "sleep", json!({"ms": 5, "tag": "fine"})),
    ];

    let results = executor
        .execute(&calls, &CancellationToken::new(), &AgentEventStream::new())
        .await;

    assert!(results[0].is_error);
    assert_eq!(results[0].text(), "disk full");
    assert!(!results[1].is_error);
    assert_eq!(results[1].text(), "fine");
}

#[tokio::test]
async fn test_unknown_tool_yields_error_result() {
    let executor = executor(vec![sleep_tool()]);
    let events = AgentEventStream::new();
    let results = executor
        .execute(
            &[ToolCall::new("1", "nope", json!({}))],
            &CancellationToken::new(),
            &events,
        )
        .await;

    assert!(results[0].is_error);
    assert_eq!(results[0].text(), "tool nope not found");
    assert_eq!(
        results[0].text(),
        Error::UnknownTool("nope".to_string()).to_string()
    );

    let collected = collect(&events);
    assert_eq!(collected.len(), 2);
    assert!(matches!(
        &collected[1],
        AgentEvent::ToolExecutionEnd { is_error: true, .. }
    ));
}

#[tokio::test]
async fn test_invalid_arguments_skip_execution() {
    let mut strict = MockAgentTool::new();
    strict.expect_definition().return_const(
        ToolDefinition::new("strict", "Needs x").with_parameters(json!({
            "type": "object",
            "properties": { "x": { "type": "integer" } },
            "required": ["x"]
        })),
    );
    strict.expect_execute().never();

    let executor = executor(vec![Arc::new(strict)]);
    let results = executor
        .execute(
            &[ToolCall::new("1", "strict", json!({"x": "one"}))],
            &CancellationToken::new(),
            &AgentEventStream::new(),
        )
        .await;

    assert!(results[0].is_error);
    assert!(results[0].text().contains("validation failed"));
    assert!(results[0].details["validation_errors"].is_array());
}

#[tokio::test]
async fn test_progress_updates_precede_end() {
    let reporter: Arc<dyn AgentTool> = Arc::new(FnTool::new(
        ToolDefinition::new("download", "Reports progress"),
        |invocation: ToolInvocation| async move {
            invocation.updates.send(AgentToolResult::text("50%")).await;
            invocation.updates.send(AgentToolResult::text("100%")).await;
            Ok(AgentToolResult::text("saved"))
        },
    ));
    let executor = executor(vec![reporter]);
    let events = AgentEventStream::new();

    executor
        .execute(
            &[ToolCall::new("dl", "download", json!({}))],
            &CancellationToken::new(),
            &events,
        )
        .await;

    let kinds: Vec<_> = collect(&events).iter().map(AgentEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "tool_execution_start",
            "tool_execution_update",
            "tool_execution_update",
            "tool_execution_end",
        ]
    );
}

#[tokio::test]
async fn test_cancellation_reaches_running_tools() {
    let executor = executor(vec![polite_tool(), sleep_tool()]);
    let cancel = CancellationToken::new();
    let calls = vec![
        ToolCall::new("1", "polite", json!({})),
        ToolCall::new("2", "sleep", json!({"ms": 5, "tag": "quick"})),
    ];

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let results = executor
        .execute(&calls, &cancel, &AgentEventStream::new())
        .await;

    assert!(results[0].is_error);
    assert_eq!(results[0].text(), "Tool execution cancelled");
    assert!(!results[1].is_error);
}

#[tokio::test]
async fn test_stubborn_tool_abandoned_after_grace() {
    let executor =
        executor(vec![stubborn_tool()]).with_cancel_grace(Duration::from_millis(50));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let started = Instant::now();
    let results = executor
        .execute(
            &[ToolCall::new("1", "stubborn", json!({}))],
            &cancel,
            &AgentEventStream::new(),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(results[0].is_error);
    assert_eq!(results[0].text(), "Tool execution cancelled");
}

#[tokio::test]
async fn test_timeout_produces_error_result() {
    let executor = executor(vec![stubborn_tool()])
        .with_timeout(Some(Duration::from_millis(50)))
        .with_cancel_grace(Duration::from_millis(20));

    let results = executor
        .execute(
            &[ToolCall::new("1", "stubborn", json!({}))],
            &CancellationToken::new(),
            &AgentEventStream::new(),
        )
        .await;

    assert!(results[0].is_error);
    assert_eq!(results[0].text(), "Tool execution timed out after 50 ms");
}

#[tokio::test]
async fn test_panicking_tool_is_contained() {
    let broken: Arc<dyn AgentTool> = Arc::new(FnTool::new(
        ToolDefinition::new("broken", "Panics"),
        |_invocation: ToolInvocation| async move {
            if true {
                panic!("tool bug");
            }
            Ok(AgentToolResult::default())
        },
    ));
    let executor = executor(vec![broken, sleep_tool()]);
    let calls = vec![
        ToolCall::new("1", "broken", json!({})),
        ToolCall::new("2", "sleep", json!({"ms": 1, "tag": "ok"})),
    ];

    let results = executor
        .execute(&calls, &CancellationToken::new(), &AgentEventStream::new())
        .await;

    assert!(results[0].is_error);
    assert!(results[0].text().contains("crashed"));
    assert_eq!(results[1].text(), "ok");
}
