//! Agent - public entry point
//!
//! Owns the conversation and configuration of one agent, enforces that at
//! most one run is active at a time, and republishes run events to
//! long-lived subscribers.
//!
//! ```no_run
//! use pi_agent::{Agent, AgentOptions};
//! use pi_ai::{MockStreamer, Model};
//! use std::sync::Arc;
//!
//! # async fn demo() -> pi_agent::Result<()> {
//! let model = Model::new("mock-model", "mock", "mock-api");
//! let agent = Agent::new(AgentOptions::new(model, Arc::new(MockStreamer::new())));
//!
//! let mut events = agent.subscribe();
//! let outcome = agent.prompt("What's 2+2?").await?;
//! # Ok(())
//! # }
//! ```

use crate::agent_loop::{
    agent_loop, agent_loop_continue, AgentContext, ApiKeyResolver, ContextTransform, LoopConfig,
};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::event::{AgentEvent, AgentEventStream, RunOutcome};
use crate::event_bus::{EventBus, EventSubscription};
use crate::queue::{QueueKind, QueueManager, QueueMode};
use crate::state::{AgentState, RunStatus};
use crate::tool::ToolRegistry;
use pi_ai::{Message, Model, ModelStreamer, StreamItem, ThinkingLevel};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Construction options for an [`Agent`]
#[derive(Clone)]
pub struct AgentOptions {
    /// Model to talk to
    pub model: Model,
    /// Provider stream implementation
    pub streamer: Arc<dyn ModelStreamer>,
    /// System prompt
    pub system_prompt: String,
    /// Requested reasoning effort
    pub thinking_level: ThinkingLevel,
    /// Registered tools
    pub tools: ToolRegistry,
    /// Initial history, e.g. restored from storage
    pub messages: Vec<Message>,
    /// Runtime limits and queue policy
    pub config: AgentConfig,
    /// History hook applied before every provider call
    pub transform: Option<Arc<dyn ContextTransform>>,
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
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("model", &self.model.id)
            .field("streamer", &self.streamer.name())
            .field("tools", &self.tools)
            .field("messages", &self.messages.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AgentOptions {
    /// Options with default configuration and no tools
    #[must_use]
    pub fn new(model: Model, streamer: Arc<dyn ModelStreamer>) -> Self {
        Self {
            model,
            streamer,
            system_prompt: String::new(),
            thinking_level: ThinkingLevel::Off,
            tools: ToolRegistry::new(),
            messages: Vec::new(),
            config: AgentConfig::default(),
            transform: None,
            temperature: None,
            max_tokens: None,
            api_key: None,
            api_key_resolver: None,
            session_id: None,
            headers: HashMap::new(),
        }
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the thinking level
    #[must_use]
    pub fn with_thinking_level(mut self, level: ThinkingLevel) -> Self {
        self.thinking_level = level;
        self
    }

    /// Set the tools
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the initial history
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the runtime configuration
    #[must_use]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a history hook
    #[must_use]
    pub fn with_transform(mut self, transform: Arc<dyn ContextTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Resolve the API key before every provider request
    #[must_use]
    pub fn with_api_key_resolver(mut self, resolver: Arc<dyn ApiKeyResolver>) -> Self {
        self.api_key_resolver = Some(resolver);
        self
    }

    /// Set the session identifier
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

struct Inner {
    state: Mutex<AgentState>,
    queues: Arc<QueueManager>,
    status: watch::Sender<RunStatus>,
    cancel: Mutex<Option<CancellationToken>>,
    bus: EventBus,
    options: AgentOptions,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Mirror a run event into the state
    fn apply(&self, event: &AgentEvent) {
        let mut state = self.state();
        match event {
            AgentEvent::MessageStart { message } => {
                if matches!(message, Message::Assistant(_)) {
                    state.stream_message = Some(message.clone());
                }
            }
            AgentEvent::MessageUpdate { message, .. } => {
                state.stream_message = Some(Message::Assistant(message.clone()));
            }
            AgentEvent::MessageEnd { message } => {
                state.stream_message = None;
                state.messages.push(message.clone());
            }
            AgentEvent::ToolExecutionStart { tool_call_id, .. } => {
                state.pending_tool_calls.insert(tool_call_id.clone());
            }
            AgentEvent::ToolExecutionEnd { tool_call_id, .. } => {
                state.pending_tool_calls.remove(tool_call_id);
            }
            AgentEvent::Error { message } => {
                state.error = Some(message.clone());
            }
            AgentEvent::AgentEnd { .. } => {
                state.stream_message = None;
                state.pending_tool_calls.clear();
            }
            AgentEvent::AgentStart
            | AgentEvent::TurnStart { .. }
            | AgentEvent::TurnEnd { .. }
            | AgentEvent::ToolExecutionUpdate { .. } => {}
        }
    }
}

/// Holds the single-flight slot until the run's stream has resolved
struct RunGuard {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        // No-op for a run that already ended
        self.cancel.cancel();
        self.inner.cancel_slot().take();
        {
            let mut state = self.inner.state();
            state.stream_message = None;
            state.pending_tool_calls.clear();
        }
        self.inner.status.send_replace(RunStatus::Idle);
    }
}

/// A conversational agent.
///
/// Cloning is cheap; clones share the same conversation, queues and run.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("status", &self.inner.status())
            .field("messages", &self.inner.state().messages.len())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create an idle agent
    #[must_use]
    pub fn new(options: AgentOptions) -> Self {
        let mut state = AgentState::new(options.model.clone());
        state.system_prompt = options.system_prompt.clone();
        state.thinking_level = options.thinking_level;
        state.tools = Arc::new(options.tools.clone());
        state.messages = options.messages.clone();

        let queues = Arc::new(QueueManager::with_modes(
            options.config.steering_mode,
            options.config.follow_up_mode,
        ));
        let (status, _) = watch::channel(RunStatus::Idle);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                queues,
                status,
                cancel: Mutex::new(None),
                bus: EventBus::new(),
                options,
            }),
        }
    }

    /// Send a user prompt and run until the agent settles
    pub async fn prompt(&self, text: impl Into<String>) -> Result<RunOutcome> {
        self.prompt_messages(vec![Message::user(text)]).await
    }

    /// Send one message and run until the agent settles
    pub async fn prompt_message(&self, message: Message) -> Result<RunOutcome> {
        self.prompt_messages(vec![message]).await
    }

    /// Send several messages as one prompt and run until the agent settles.
    ///
    /// Fails with [`Error::AlreadyRunning`] while another run is active;
    /// use [`steer`](Self::steer) or [`follow_up`](Self::follow_up) instead.
    pub async fn prompt_messages(&self, messages: Vec<Message>) -> Result<RunOutcome> {
        let guard = self.begin_run()?;
        let (context, config) = self.loop_inputs();
        let stream = agent_loop(messages, context, config, guard.cancel.clone());
        self.drive(stream, guard).await
    }

    /// Resume from the current history.
    ///
    /// When the history ends with an assistant message, queued steering
    /// messages (or, failing that, follow-up messages) become the prompt.
    pub async fn continue_run(&self) -> Result<RunOutcome> {
        let guard = self.begin_run()?;
        let (context, config) = self.loop_inputs();

        let stream = if matches!(context.messages.last(), Some(Message::Assistant(_))) {
            let mut queued = self.inner.queues.drain(QueueKind::Steering);
            if queued.is_empty() {
                queued = self.inner.queues.drain(QueueKind::FollowUp);
            }
            if queued.is_empty() {
                return Err(Error::InvalidState(
                    "Cannot continue from message role: assistant".to_string(),
                ));
            }
            agent_loop(queued, context, config, guard.cancel.clone())
        } else {
            agent_loop_continue(context, config, guard.cancel.clone())?
        };
        self.drive(stream, guard).await
    }

    /// Listen to the events of every subsequent run.
    ///
    /// Every event is delivered in order, however slowly it is read.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.bus.subscribe()
    }

    /// Queue a message for the next provider call of the active run
    pub fn steer(&self, message: impl Into<Message>) {
        self.inner.queues.enqueue(QueueKind::Steering, message.into());
    }

    /// Queue a message for when the agent would otherwise stop
    pub fn follow_up(&self, message: impl Into<Message>) {
        self.inner.queues.enqueue(QueueKind::FollowUp, message.into());
    }

    /// Set the steering drain policy
    pub fn set_steering_mode(&self, mode: QueueMode) {
        self.inner.queues.set_mode(QueueKind::Steering, mode);
    }

    /// Set the follow-up drain policy
    pub fn set_follow_up_mode(&self, mode: QueueMode) {
        self.inner.queues.set_mode(QueueKind::FollowUp, mode);
    }

    /// Current steering drain policy
    #[must_use]
    pub fn steering_mode(&self) -> QueueMode {
        self.inner.queues.mode(QueueKind::Steering)
    }

    /// Current follow-up drain policy
    #[must_use]
    pub fn follow_up_mode(&self) -> QueueMode {
        self.inner.queues.mode(QueueKind::FollowUp)
    }

    /// Abort the active run; no-op when idle
    pub fn abort(&self) {
        let token = self.inner.cancel_slot().clone();
        if let Some(token) = token {
            let signaled = self.inner.status.send_if_modified(|status| {
                if *status == RunStatus::Running {
                    *status = RunStatus::Aborting;
                    true
                } else {
                    false
                }
            });
            if signaled {
                info!("Aborting agent run");
            }
            token.cancel();
        }
    }

    /// Wait until no run is active
    pub async fn wait_for_idle(&self) {
        let mut status = self.inner.status.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = status.wait_for(|s| *s == RunStatus::Idle).await;
    }

    /// Drop queued steering messages
    pub fn clear_steering_queue(&self) {
        self.inner.queues.clear(QueueKind::Steering);
    }

    /// Drop queued follow-up messages
    pub fn clear_follow_up_queue(&self) {
        self.inner.queues.clear(QueueKind::FollowUp);
    }

    /// Drop all queued messages
    pub fn clear_all_queues(&self) {
        self.inner.queues.clear_all();
    }

    /// Whether any message is queued
    #[must_use]
    pub fn has_queued_messages(&self) -> bool {
        self.inner.queues.has_pending()
    }

    /// Clear history, queues and the last error
    pub fn reset(&self) -> Result<()> {
        self.ensure_idle()?;
        {
            let mut state = self.inner.state();
            state.messages.clear();
            state.stream_message = None;
            state.pending_tool_calls.clear();
            state.error = None;
        }
        self.inner.queues.clear_all();
        debug!("Agent reset");
        Ok(())
    }

    /// Replace the history, e.g. with a restored session
    pub fn replace_messages(&self, messages: Vec<Message>) -> Result<()> {
        self.ensure_idle()?;
        self.inner.state().messages = messages;
        Ok(())
    }

    /// Append one message to the history
    pub fn append_message(&self, message: Message) -> Result<()> {
        self.ensure_idle()?;
        self.inner.state().messages.push(message);
        Ok(())
    }

    /// Copy of the history
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner.state().messages.clone()
    }

    /// Snapshot of the whole state
    #[must_use]
    pub fn state(&self) -> AgentState {
        let mut snapshot = self.inner.state().clone();
        snapshot.status = self.inner.status();
        snapshot
    }

    /// Whether a run is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.status().is_active()
    }

    /// Set the system prompt used by the next run
    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        self.inner.state().system_prompt = prompt.into();
    }

    /// Set the thinking level used by the next run
    pub fn set_thinking_level(&self, level: ThinkingLevel) {
        self.inner.state().thinking_level = level;
    }

    /// Switch models; rejected while a run is active
    pub fn set_model(&self, model: Model) -> Result<()> {
        self.ensure_idle()?;
        self.inner.state().model = model;
        Ok(())
    }

    /// Replace the tools; rejected while a run is active
    pub fn set_tools(&self, tools: ToolRegistry) -> Result<()> {
        self.ensure_idle()?;
        self.inner.state().tools = Arc::new(tools);
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        Ok(())
    }

    fn begin_run(&self) -> Result<RunGuard> {
        // Held across the status flip so abort() never sees a running agent without a token
        let mut slot = self.inner.cancel_slot();
        let acquired = self.inner.status.send_if_modified(|status| {
            if *status == RunStatus::Idle {
                *status = RunStatus::Running;
                true
            } else {
                false
            }
        });
        if !acquired {
            return Err(Error::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        *slot = Some(cancel.clone());
        drop(slot);
        self.inner.state().error = None;
        Ok(RunGuard {
            inner: Arc::clone(&self.inner),
            cancel,
        })
    }

    fn loop_inputs(&self) -> (AgentContext, LoopConfig) {
        let options = &self.inner.options;
        let state = self.inner.state();

        let context = AgentContext {
            system_prompt: state.system_prompt.clone(),
            messages: state.messages.clone(),
            tools: Arc::clone(&state.tools),
        };

        let mut config = LoopConfig::new(state.model.clone(), Arc::clone(&options.streamer))
            .with_thinking_level(state.thinking_level)
            .with_retry(options.config.retry.clone())
            .with_llm_timeout(options.config.llm_timeout())
            .with_tool_timeout(options.config.tool_timeout())
            .with_cancel_grace(options.config.cancel_grace())
            .with_queues(Arc::clone(&self.inner.queues));
        config.temperature = options.temperature;
        config.max_tokens = options.max_tokens;
        config.api_key = options.api_key.clone();
        config.api_key_resolver = options.api_key_resolver.clone();
        config.session_id = options.session_id.clone();
        config.headers = options.headers.clone();
        config.transform = options.transform.clone();

        (context, config)
    }

    /// Mirror the run into the state and the bus until it resolves.
    ///
    /// The mirroring task owns the guard, so dropping the caller's future
    /// aborts the run but keeps the agent busy until the run has wound down.
    async fn drive(&self, stream: AgentEventStream, guard: RunGuard) -> Result<RunOutcome> {
        let abort_on_drop = guard.cancel.clone().drop_guard();
        let inner = Arc::clone(&self.inner);
        let mut events = stream.events();

        let mirror = tokio::spawn(async move {
            let _guard = guard;
            while let Some(item) = events.next().await {
                match item {
                    StreamItem::Event(event) => {
                        inner.apply(&event);
                        inner.bus.publish(event);
                    }
                    StreamItem::End(outcome) => return Some(outcome),
                }
            }
            None
        });

        let settled = mirror.await;
        let _ = abort_on_drop.disarm();
        match settled {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => Err(Error::StreamClosed),
            Err(join_error) => Err(Error::InvalidState(format!(
                "agent event mirror failed: {join_error}"
            ))),
        }
    }
}
