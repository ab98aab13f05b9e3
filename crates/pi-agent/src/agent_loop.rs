//! Agent Loop
//!
//! Drives one run: repeated turns of model streaming and tool execution
//! until the model answers without tool calls and no queued message is
//! waiting. Every run ends with exactly one `agent_end` event followed by
//! the stream's terminal [`RunOutcome`].
//!
//! Queue policy:
//! - follow-up messages are drained when a run starts and when it would
//!   otherwise end
//! - steering messages are drained at the top of every turn, right before
//!   the next provider call

use crate::error::{Error, Result};
use crate::event::{AgentEvent, AgentEventStream, RunOutcome};
use crate::executor::{ToolExecutor, DEFAULT_CANCEL_GRACE};
use crate::queue::{QueueKind, QueueManager};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::tool::ToolRegistry;
use async_trait::async_trait;
use pi_ai::{
    AssistantMessage, AssistantMessageEvent, Context, Message, Model, ModelStreamer, StopReason,
    StreamItem, StreamOptions, ThinkingLevel, ToolCall,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Default idle timeout between two model stream events
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// Default limit for a single tool call
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Hook applied to the history before every provider call.
///
/// Typical uses are pruning old turns or injecting external context. The
/// committed history is never modified; only the outbound request sees the
/// transformed messages.
#[async_trait]
pub trait ContextTransform: Send + Sync {
    /// Produce the messages to send for the next request
    async fn transform(
        &self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>>;
}

#[async_trait]
impl<F, Fut> ContextTransform for F
where
    F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Message>>> + Send + 'static,
{
    async fn transform(
        &self,
        messages: Vec<Message>,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        (self)(messages).await
    }
}

/// Resolves the API key for a provider right before each request.
///
/// Lets hosts hand out short-lived credentials. A `None` answer falls back
/// to the static key in [`LoopConfig::api_key`].
#[async_trait]
pub trait ApiKeyResolver: Send + Sync {
    /// Key to send to `provider`, if any
    async fn resolve(&self, provider: &str) -> Option<String>;
}

#[async_trait]
impl<F, Fut> ApiKeyResolver for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    async fn resolve(&self, provider: &str) -> Option<String> {
        (self)(provider.to_string()).await
    }
}

/// Conversation a run starts from
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    /// System prompt; omitted from requests when empty
    pub system_prompt: String,
    /// History so far
    pub messages: Vec<Message>,
    /// Tools available during the run
    pub tools: Arc<ToolRegistry>,
}

impl AgentContext {
    /// Create an empty context
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            ..Self::default()
        }
    }

    /// Set the history
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the tools
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }
}

/// Everything a run needs besides the conversation
#[derive(Clone)]
pub struct LoopConfig {
    /// Model to talk to
    pub model: Model,
    /// Provider stream implementation
    pub streamer: Arc<dyn ModelStreamer>,
    /// Requested reasoning effort
    pub thinking_level: ThinkingLevel,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Output token limit
    pub max_tokens: Option<u32>,
    /// API key override
    pub api_key: Option<String>,
    /// Per-request key lookup, consulted before `api_key`
    pub api_key_resolver: Option<Arc<dyn ApiKeyResolver>>,
    /// Session identifier forwarded to the provider
    pub session_id: Option<String>,
    /// Extra request headers
    pub headers: HashMap<String, String>,
    /// Provider retry policy
    pub retry: RetryConfig,
    /// Idle timeout between stream events; `None` waits forever
    pub llm_timeout: Option<Duration>,
    /// Limit for one tool call; `None` waits forever
    pub tool_timeout: Option<Duration>,
    /// Time a cancelled tool gets to settle before it is abandoned
    pub cancel_grace: Duration,
    /// Steering and follow-up queues
    pub queues: Option<Arc<QueueManager>>,
    /// History hook applied before every provider call
    pub transform: Option<Arc<dyn ContextTransform>>,
}

impl std::fmt::Debug for LoopConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopConfig")
            .field("model", &self.model.id)
            .field("streamer", &self.streamer.name())
            .field("thinking_level", &self.thinking_level)
            .field("retry", &self.retry)
            .field("llm_timeout", &self.llm_timeout)
            .field("tool_timeout", &self.tool_timeout)
            .field("cancel_grace", &self.cancel_grace)
            .field("queues", &self.queues.is_some())
            .field("transform", &self.transform.is_some())
            .field("api_key_resolver", &self.api_key_resolver.is_some())
            .finish_non_exhaustive()
    }
}

impl LoopConfig {
    /// Create a configuration with default limits
    #[must_use]
    pub fn new(model: Model, streamer: Arc<dyn ModelStreamer>) -> Self {
        Self {
            model,
            streamer,
            thinking_level: ThinkingLevel::Off,
            temperature: None,
            max_tokens: None,
            api_key: None,
            api_key_resolver: None,
            session_id: None,
            headers: HashMap::new(),
            retry: RetryConfig::default(),
            llm_timeout: Some(DEFAULT_LLM_TIMEOUT),
            tool_timeout: Some(DEFAULT_TOOL_TIMEOUT),
            cancel_grace: DEFAULT_CANCEL_GRACE,
            queues: None,
            transform: None,
        }
    }

    /// Set the thinking level
    #[must_use]
    pub fn with_thinking_level(mut self, level: ThinkingLevel) -> Self {
        self.thinking_level = level;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the idle timeout between stream events
    #[must_use]
    pub fn with_llm_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Set the per-call tool timeout
    #[must_use]
    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Set the cancellation grace period
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Attach steering and follow-up queues
    #[must_use]
    pub fn with_queues(mut self, queues: Arc<QueueManager>) -> Self {
        self.queues = Some(queues);
        self
    }

    /// Attach a history hook
    #[must_use]
    pub fn with_transform(mut self, transform: Arc<dyn ContextTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Attach a per-request API key lookup
    #[must_use]
    pub fn with_api_key_resolver(mut self, resolver: Arc<dyn ApiKeyResolver>) -> Self {
        self.api_key_resolver = Some(resolver);
        self
    }

    async fn resolve_api_key(&self) -> Option<String> {
        let resolved = match &self.api_key_resolver {
            Some(resolver) => resolver.resolve(&self.model.provider).await,
            None => None,
        };
        resolved.or_else(|| self.api_key.clone())
    }

    fn stream_options(&self, api_key: Option<String>, cancel: &CancellationToken) -> StreamOptions {
        StreamOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            api_key,
            session_id: self.session_id.clone(),
            headers: self.headers.clone(),
            reasoning: self.thinking_level.reasoning(),
            max_retry_delay_ms: Some(self.retry.max_delay_ms),
            cancel: cancel.clone(),
        }
    }
}

/// Start a run with `prompts` appended to the history.
///
/// The run executes on a spawned task; the returned stream reports its
/// progress and resolves with its outcome.
pub fn agent_loop(
    prompts: Vec<Message>,
    context: AgentContext,
    config: LoopConfig,
    cancel: CancellationToken,
) -> AgentEventStream {
    let stream = AgentEventStream::new();
    spawn_run(Run::new(context, config, cancel, stream.clone()), prompts);
    stream
}

/// Resume a run from the existing history.
///
/// The last message must be a user or tool result message, so the model
/// has something to answer.
pub fn agent_loop_continue(
    context: AgentContext,
    config: LoopConfig,
    cancel: CancellationToken,
) -> Result<AgentEventStream> {
    match context.messages.last() {
        None => Err(Error::InvalidState(
            "Cannot continue: no messages in context".to_string(),
        )),
        Some(Message::Assistant(_)) => Err(Error::InvalidState(
            "Cannot continue from message role: assistant".to_string(),
        )),
        Some(_) => Ok(agent_loop(Vec::new(), context, config, cancel)),
    }
}

fn spawn_run(run: Run, prompts: Vec<Message>) {
    let stream = run.stream.clone();
    let span = info_span!("agent_run", run_id = %run.id, model = %run.config.model.id);
    let handle = tokio::spawn(run.execute(prompts).instrument(span));

    // A panicking run must still resolve its stream
    tokio::spawn(async move {
        if let Err(join_error) = handle.await {
            error!(error = %join_error, "Agent run task failed");
            let message = format!("agent run failed: {join_error}");
            let _ = stream.push(AgentEvent::Error {
                message: message.clone(),
            });
            let _ = stream.push(AgentEvent::AgentEnd {
                status: crate::event::EndStatus::Failed,
                messages: Vec::new(),
            });
            let _ = stream.end(RunOutcome::Failed {
                error: message,
                new_messages: Vec::new(),
            });
        }
    });
}

/// Why a run stopped early
enum Halt {
    Aborted,
    Failed(String),
}

struct Run {
    id: Uuid,
    context: AgentContext,
    config: LoopConfig,
    cancel: CancellationToken,
    stream: AgentEventStream,
    executor: ToolExecutor,
    new_messages: Vec<Message>,
}

impl Run {
    fn new(
        context: AgentContext,
        config: LoopConfig,
        cancel: CancellationToken,
        stream: AgentEventStream,
    ) -> Self {
        let executor = ToolExecutor::new(Arc::clone(&context.tools))
            .with_timeout(config.tool_timeout)
            .with_cancel_grace(config.cancel_grace);
        Self {
            id: Uuid::new_v4(),
            context,
            config,
            cancel,
            stream,
            executor,
            new_messages: Vec::new(),
        }
    }

    async fn execute(mut self, prompts: Vec<Message>) {
        info!(
            streamer = self.config.streamer.name(),
            tools = self.context.tools.len(),
            history = self.context.messages.len(),
            "Agent run started"
        );
        self.emit(AgentEvent::AgentStart);

        let outcome = match self.run_turns(prompts).await {
            Ok(message) => RunOutcome::Completed {
                message,
                new_messages: std::mem::take(&mut self.new_messages),
            },
            Err(Halt::Aborted) => RunOutcome::Aborted {
                new_messages: std::mem::take(&mut self.new_messages),
            },
            Err(Halt::Failed(error)) => RunOutcome::Failed {
                error,
                new_messages: std::mem::take(&mut self.new_messages),
            },
        };
        self.finish(outcome);
    }

    async fn run_turns(&mut self, prompts: Vec<Message>) -> std::result::Result<AssistantMessage, Halt> {
        let mut pending = prompts;
        pending.extend(self.drain(QueueKind::FollowUp));
        let mut turn: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Halt::Aborted);
            }
            turn += 1;
            debug!(turn, "Turn started");
            self.emit(AgentEvent::TurnStart { turn });

            pending.extend(self.drain(QueueKind::Steering));
            for message in pending.drain(..) {
                self.commit(message);
            }

            let message = self.stream_assistant_response().await?;
            let calls: Vec<ToolCall> = message.tool_calls().into_iter().cloned().collect();

            let tool_results = if calls.is_empty() {
                Vec::new()
            } else {
                info!(turn, calls = calls.len(), "Executing tool calls");
                let results = self
                    .executor
                    .execute(&calls, &self.cancel, &self.stream)
                    .await;
                for result in &results {
                    self.commit(Message::ToolResult(result.clone()));
                }
                results
            };

            self.emit(AgentEvent::TurnEnd {
                turn,
                message: message.clone(),
                tool_results,
            });

            if self.cancel.is_cancelled() {
                return Err(Halt::Aborted);
            }
            if !calls.is_empty() || self.has_pending(QueueKind::Steering) {
                continue;
            }

            pending = self.drain(QueueKind::FollowUp);
            if pending.is_empty() {
                return Ok(message);
            }
        }
    }

    /// Request one assistant message and commit it to the history
    async fn stream_assistant_response(&mut self) -> std::result::Result<AssistantMessage, Halt> {
        let messages = match &self.config.transform {
            Some(transform) => {
                let transformed = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(Halt::Aborted),
                    r = transform.transform(self.context.messages.clone(), &self.cancel) => r,
                };
                transformed.map_err(|e| {
                    warn!(error = %e, "Context transform failed");
                    Halt::Failed(e.to_string())
                })?
            }
            None => self.context.messages.clone(),
        };

        let request = Context {
            system_prompt: (!self.context.system_prompt.is_empty())
                .then(|| self.context.system_prompt.clone()),
            messages,
            tools: self.context.tools.specs(),
        };

        let config = &self.config;
        let cancel = &self.cancel;
        let api_key = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Halt::Aborted),
            key = config.resolve_api_key() => key,
        };
        let response = retry_with_backoff(&config.retry, cancel, |attempt| {
            let request = request.clone();
            let options = config.stream_options(api_key.clone(), cancel);
            async move {
                debug!(attempt, messages = request.messages.len(), "Requesting model stream");
                let started = config.streamer.stream(&config.model, request, options);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(pi_ai::Error::Aborted),
                    r = within(config.llm_timeout, started) => match r {
                        Some(result) => result,
                        None => Err(pi_ai::Error::Timeout(timeout_ms(config.llm_timeout))),
                    },
                }
            }
        })
        .await;

        let response = match response {
            Ok(response) => response,
            Err(err) if matches!(err.last_error, pi_ai::Error::Aborted) => {
                return Err(Halt::Aborted)
            }
            Err(err) => return Err(Halt::Failed(Error::Provider(err).to_string())),
        };

        let mut events = response.events();
        let mut started = false;
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Aborted),
                item = within(self.config.llm_timeout, events.next()) => item,
            };

            let event = match item {
                None => {
                    return Err(Halt::Failed(format!(
                        "model stream idle for more than {} ms",
                        timeout_ms(self.config.llm_timeout)
                    )))
                }
                Some(None) => {
                    return Err(Halt::Failed(
                        "model stream ended without a final message".to_string(),
                    ))
                }
                Some(Some(StreamItem::End(message))) => {
                    return self.settle_response(message, started)
                }
                Some(Some(StreamItem::Event(event))) => event,
            };

            let partial = match event {
                AssistantMessageEvent::Start { partial } => {
                    started = true;
                    self.emit(AgentEvent::MessageStart {
                        message: Message::Assistant(partial),
                    });
                    continue;
                }
                AssistantMessageEvent::Done { message, .. }
                | AssistantMessageEvent::Error { error: message, .. } => {
                    return self.settle_response(message, started);
                }
                AssistantMessageEvent::TextStart { ref partial, .. }
                | AssistantMessageEvent::TextDelta { ref partial, .. }
                | AssistantMessageEvent::TextEnd { ref partial, .. }
                | AssistantMessageEvent::ThinkingStart { ref partial, .. }
                | AssistantMessageEvent::ThinkingDelta { ref partial, .. }
                | AssistantMessageEvent::ThinkingEnd { ref partial, .. }
                | AssistantMessageEvent::ToolCallStart { ref partial, .. }
                | AssistantMessageEvent::ToolCallDelta { ref partial, .. }
                | AssistantMessageEvent::ToolCallEnd { ref partial, .. } => partial.clone(),
            };

            if !started {
                started = true;
                self.emit(AgentEvent::MessageStart {
                    message: Message::Assistant(partial.clone()),
                });
            }
            self.emit(AgentEvent::MessageUpdate {
                message: partial,
                assistant_message_event: event,
            });
        }
    }

    fn settle_response(
        &mut self,
        message: AssistantMessage,
        started: bool,
    ) -> std::result::Result<AssistantMessage, Halt> {
        if message.stop_reason == StopReason::Aborted {
            debug!("Model stream reported abort, discarding partial message");
            return Err(Halt::Aborted);
        }

        if !started {
            self.emit(AgentEvent::MessageStart {
                message: Message::Assistant(message.clone()),
            });
        }
        self.append(Message::Assistant(message.clone()));
        self.emit(AgentEvent::MessageEnd {
            message: Message::Assistant(message.clone()),
        });

        if message.stop_reason == StopReason::Error {
            let error = message
                .error_message
                .clone()
                .unwrap_or_else(|| "model stream failed".to_string());
            return Err(Halt::Failed(error));
        }
        Ok(message)
    }

    /// Emit start and end for a complete message and append it
    fn commit(&mut self, message: Message) {
        self.emit(AgentEvent::MessageStart {
            message: message.clone(),
        });
        self.append(message.clone());
        self.emit(AgentEvent::MessageEnd { message });
    }

    fn append(&mut self, message: Message) {
        self.context.messages.push(message.clone());
        self.new_messages.push(message);
    }

    fn drain(&self, kind: QueueKind) -> Vec<Message> {
        let Some(queues) = &self.config.queues else {
            return Vec::new();
        };
        let drained = queues.drain(kind);
        if !drained.is_empty() {
            debug!(queue = kind.as_str(), count = drained.len(), "Drained queued messages");
        }
        drained
    }

    fn has_pending(&self, kind: QueueKind) -> bool {
        self.config
            .queues
            .as_ref()
            .is_some_and(|q| q.has_pending_in(kind))
    }

    fn emit(&self, event: AgentEvent) {
        if self.stream.push(event).is_err() {
            warn!("Agent event stream already closed");
        }
    }

    fn finish(self, outcome: RunOutcome) {
        match &outcome {
            RunOutcome::Completed { new_messages, .. } => {
                info!(new_messages = new_messages.len(), "Agent run completed");
            }
            RunOutcome::Failed { error, .. } => {
                error!(error = %error, "Agent run failed");
                self.emit(AgentEvent::Error {
                    message: error.clone(),
                });
            }
            RunOutcome::Aborted { .. } => info!("Agent run aborted"),
        }

        self.emit(AgentEvent::AgentEnd {
            status: outcome.status(),
            messages: outcome.new_messages().to_vec(),
        });
        if self.stream.end(outcome).is_err() {
            warn!("Agent run resolved twice");
        }
    }
}

/// Await `future`, giving up after `limit`
async fn within<F: Future>(limit: Option<Duration>, future: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}

fn timeout_ms(limit: Option<Duration>) -> u64 {
    limit.map_or(0, |d| d.as_millis() as u64)
}
