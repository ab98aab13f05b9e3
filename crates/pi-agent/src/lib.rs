//! Pi Agent - Agent loop runtime
//!
//! This crate drives multi-turn conversations between a caller and a model:
//! - Agent: single-flight facade with prompt, steer, follow-up and abort
//! - Agent Loop: turn scheduler with retries, timeouts and cancellation
//! - Executor: concurrent tool execution with isolated failures
//! - Queue: steering and follow-up queues with drain policies
//! - Tool: tool contract, registry and argument validation
//! - Event Bus: fan-out of agent events to long-lived listeners
//! - Config: layered runtime configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod agent_loop;
pub mod config;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod executor;
pub mod queue;
pub mod retry;
pub mod state;
pub mod tool;

pub use agent::{Agent, AgentOptions};
pub use agent_loop::{
    agent_loop, agent_loop_continue, AgentContext, ApiKeyResolver, ContextTransform, LoopConfig,
    DEFAULT_LLM_TIMEOUT, DEFAULT_TOOL_TIMEOUT,
};
pub use config::AgentConfig;
pub use error::{Error, Result};
pub use event::{AgentEvent, AgentEventStream, EndStatus, RunOutcome};
pub use event_bus::{EventBus, EventSubscription};
pub use executor::{ToolExecutor, DEFAULT_CANCEL_GRACE};
pub use queue::{QueueKind, QueueManager, QueueMode};
pub use retry::{retry_with_backoff, RetryConfig, RetryError};
pub use state::{AgentState, RunStatus};
pub use tool::{
    validate_arguments, AgentTool, AgentToolResult, FnTool, ToolDefinition, ToolInvocation,
    ToolRegistry, ToolUpdateSender,
};
