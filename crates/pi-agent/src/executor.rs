//! Tool Executor
//!
//! Runs every tool call of one assistant message concurrently:
//! - Start events are emitted in issuance order before any call runs
//! - Progress updates are forwarded as they arrive, attributed by call id
//! - End events are emitted as calls settle
//! - Results are returned in issuance order
//!
//! A failing call never affects its siblings. A call that is cancelled or
//! times out gets its token cancelled and a grace period to settle; after
//! that its task is aborted and an error-flagged result stands in for it.

use crate::error::Error;
use crate::event::{AgentEvent, AgentEventStream};
use crate::tool::{validate_arguments, AgentTool, AgentToolResult, ToolRegistry, ToolUpdateSender};
use futures::future::join_all;
use pi_ai::{now_millis, ToolCall, ToolResultMessage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a cancelled tool may keep running before it is abandoned
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Per-call progress buffer; a tool awaiting `send` waits while it is full
const UPDATE_CHANNEL_CAPACITY: usize = 32;

enum Interruption {
    Cancelled,
    TimedOut(Duration),
}

/// Executes batches of tool calls
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    tools: Arc<ToolRegistry>,
    tool_timeout: Option<Duration>,
    cancel_grace: Duration,
}

impl ToolExecutor {
    /// Create an executor over `tools` with no timeout
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            tool_timeout: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Limit how long one call may run
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Set the grace period granted after cancellation
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Execute `calls` concurrently and return one result per call, in order
    pub async fn execute(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
        events: &AgentEventStream,
    ) -> Vec<ToolResultMessage> {
        for call in calls {
            let _ = events.push(AgentEvent::ToolExecutionStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: call.arguments.clone(),
            });
        }

        let settled = join_all(
            calls
                .iter()
                .map(|call| self.execute_one(call, cancel, events)),
        )
        .await;

        calls
            .iter()
            .zip(settled)
            .map(|(call, result)| ToolResultMessage {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: result.content,
                details: result.details,
                is_error: result.is_error,
                timestamp: now_millis(),
            })
            .collect()
    }

    async fn execute_one(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
        events: &AgentEventStream,
    ) -> AgentToolResult {
        let start = Instant::now();

        let result = match self.tools.get(&call.name) {
            None => {
                warn!(tool = %call.name, tool_call_id = %call.id, "Model requested unknown tool");
                AgentToolResult::error(Error::UnknownTool(call.name.clone()).to_string())
            }
            Some(tool) => {
                let errors = validate_arguments(&tool.definition().parameters, &call.arguments);
                if errors.is_empty() {
                    info!(tool = %call.name, tool_call_id = %call.id, "Executing tool");
                    self.invoke(tool, call, cancel, events).await
                } else {
                    warn!(tool = %call.name, errors = ?errors, "Tool arguments failed validation");
                    let details = serde_json::json!({ "validation_errors": errors });
                    let err = Error::ToolValidation {
                        tool: call.name.clone(),
                        errors,
                    };
                    AgentToolResult::error(err.to_string()).with_details(details)
                }
            }
        };

        info!(
            tool = %call.name,
            tool_call_id = %call.id,
            is_error = result.is_error,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool execution settled"
        );

        let _ = events.push(AgentEvent::ToolExecutionEnd {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: result.clone(),
            is_error: result.is_error,
        });
        result
    }

    async fn invoke(
        &self,
        tool: Arc<dyn AgentTool>,
        call: &ToolCall,
        cancel: &CancellationToken,
        events: &AgentEventStream,
    ) -> AgentToolResult {
        let token = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        let mut handle: JoinHandle<crate::Result<AgentToolResult>> = {
            let call_id = call.id.clone();
            let args = call.arguments.clone();
            let token = token.clone();
            let updates = ToolUpdateSender::new(tx);
            tokio::spawn(async move { tool.execute(&call_id, args, token, updates).await })
        };

        let tool_timeout = self.tool_timeout;
        let deadline = async move {
            match tool_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let interruption = loop {
            tokio::select! {
                biased;
                Some(partial) = rx.recv() => forward_update(call, partial, events),
                joined = &mut handle => {
                    drain_updates(&mut rx, call, events);
                    return settle(call, joined);
                }
                _ = token.cancelled() => break Interruption::Cancelled,
                _ = &mut deadline => {
                    break Interruption::TimedOut(tool_timeout.unwrap_or_default());
                }
            }
        };

        token.cancel();
        let grace = tokio::time::timeout(self.cancel_grace, async {
            loop {
                tokio::select! {
                    biased;
                    Some(partial) = rx.recv() => forward_update(call, partial, events),
                    joined = &mut handle => break joined,
                }
            }
        })
        .await;

        match grace {
            Ok(_) => debug!(tool = %call.name, tool_call_id = %call.id, "Tool settled after interruption"),
            Err(_) => {
                warn!(
                    tool = %call.name,
                    tool_call_id = %call.id,
                    grace_ms = self.cancel_grace.as_millis() as u64,
                    "Tool ignored cancellation, abandoning"
                );
                handle.abort();
            }
        }
        drain_updates(&mut rx, call, events);

        match interruption {
            Interruption::Cancelled => AgentToolResult::error("Tool execution cancelled"),
            Interruption::TimedOut(limit) => AgentToolResult::error(format!(
                "Tool execution timed out after {} ms",
                limit.as_millis()
            )),
        }
    }
}

fn forward_update(call: &ToolCall, partial: AgentToolResult, events: &AgentEventStream) {
    let _ = events.push(AgentEvent::ToolExecutionUpdate {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        args: call.arguments.clone(),
        partial_result: partial,
    });
}

fn drain_updates(
    rx: &mut mpsc::Receiver<AgentToolResult>,
    call: &ToolCall,
    events: &AgentEventStream,
) {
    rx.close();
    while let Ok(partial) = rx.try_recv() {
        forward_update(call, partial, events);
    }
}

fn settle(
    call: &ToolCall,
    joined: Result<crate::Result<AgentToolResult>, tokio::task::JoinError>,
) -> AgentToolResult {
    match joined {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!(tool = %call.name, tool_call_id = %call.id, error = %err, "Tool failed");
            AgentToolResult::error(err.to_string())
        }
        Err(join_error) => {
            warn!(tool = %call.name, tool_call_id = %call.id, error = %join_error, "Tool task failed");
            AgentToolResult::error(format!("Tool {} crashed: {join_error}", call.name))
        }
    }
}

#[cfg(test)]
mod tests;
