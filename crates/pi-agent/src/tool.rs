//! Tool - Contract for caller-supplied tools
//!
//! Tools are registered in a [`ToolRegistry`] before a run starts and stay
//! immutable for the duration of that run. Each invocation gets its own
//! cancellation token and a bounded channel for progress updates.

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use jsonschema::JSONSchema;
use pi_ai::{ToolResultContent, ToolSpec, UserContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tool metadata and schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name, as the model refers to it
    pub name: String,
    /// Human-readable label for UIs
    pub label: String,
    /// What the tool does, shown to the model
    pub description: String,
    /// JSON schema for the arguments
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a definition accepting any object
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    /// Set the label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the parameters schema
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Description sent to the model
    #[must_use]
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Output of a tool invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentToolResult {
    /// Content fed back to the model
    pub content: Vec<ToolResultContent>,
    /// Structured details for UIs and logs
    #[serde(default)]
    pub details: Value,
    /// Whether the tool reports failure
    #[serde(default)]
    pub is_error: bool,
}

impl AgentToolResult {
    /// Successful text result
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![UserContent::text(text)],
            details: Value::Null,
            is_error: false,
        }
    }

    /// Successful result carrying `value` both as text and as details
    #[must_use]
    pub fn json(value: Value) -> Self {
        Self {
            content: vec![UserContent::text(value.to_string())],
            details: value,
            is_error: false,
        }
    }

    /// Error-flagged text result
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![UserContent::text(message)],
            details: Value::Null,
            is_error: true,
        }
    }

    /// Attach structured details
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Concatenated text content
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content.iter().filter_map(UserContent::as_text).collect()
    }
}

/// Progress channel handed to a running tool
#[derive(Debug, Clone)]
pub struct ToolUpdateSender {
    tx: mpsc::Sender<AgentToolResult>,
}

impl ToolUpdateSender {
    pub(crate) fn new(tx: mpsc::Sender<AgentToolResult>) -> Self {
        Self { tx }
    }

    /// A sender whose updates go nowhere, for invoking tools directly
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    /// Report a partial result, waiting while the channel is full.
    ///
    /// Returns `false` once nobody is listening.
    pub async fn send(&self, partial: AgentToolResult) -> bool {
        self.tx.send(partial).await.is_ok()
    }

    /// Report a partial result without waiting; dropped when the channel is full
    pub fn try_send(&self, partial: AgentToolResult) -> bool {
        self.tx.try_send(partial).is_ok()
    }
}

/// Trait for tool implementations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Get the tool definition
    fn definition(&self) -> &ToolDefinition;

    /// Execute the tool.
    ///
    /// `cancel` fires when the run aborts or the call times out. An `Err`
    /// becomes an error-flagged result for this call only.
    async fn execute(
        &self,
        call_id: &str,
        args: Value,
        cancel: CancellationToken,
        updates: ToolUpdateSender,
    ) -> Result<AgentToolResult>;
}

/// Arguments of one [`FnTool`] invocation
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Call identifier
    pub call_id: String,
    /// Arguments from the model
    pub args: Value,
    /// Cancellation for this call
    pub cancel: CancellationToken,
    /// Progress channel
    pub updates: ToolUpdateSender,
}

type ToolHandler = dyn Fn(ToolInvocation) -> BoxFuture<'static, Result<AgentToolResult>> + Send + Sync;

/// A tool backed by an async closure
pub struct FnTool {
    definition: ToolDefinition,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    /// Wrap `handler` as a tool
    pub fn new<F, Fut>(definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AgentToolResult>> + Send + 'static,
    {
        Self {
            definition,
            handler: Arc::new(move |invocation| Box::pin(handler(invocation))),
        }
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.definition.name)
            .finish()
    }
}

#[async_trait]
impl AgentTool for FnTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        call_id: &str,
        args: Value,
        cancel: CancellationToken,
        updates: ToolUpdateSender,
    ) -> Result<AgentToolResult> {
        (self.handler)(ToolInvocation {
            call_id: call_id.to_string(),
            args,
            cancel,
            updates,
        })
        .await
    }
}

/// Registry of tools, kept in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn AgentTool>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        let name = tool.definition().name.clone();
        debug!(tool = %name, "Registering tool");
        match self.index.get(&name) {
            Some(&position) => self.tools[position] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Register a tool, builder style
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn AgentTool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    /// Check if a tool exists
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|t| t.definition().name.as_str())
            .collect()
    }

    /// Tool descriptions for the model context
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.definition().spec()).collect()
    }

    /// Get tool count
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Validate `args` against a JSON schema.
///
/// Returns one message per violation; empty when the arguments are valid or
/// the schema is empty.
#[must_use]
pub fn validate_arguments(schema: &Value, args: &Value) -> Vec<String> {
    if schema.is_null() || schema.as_object().is_some_and(|o| o.is_empty()) {
        return Vec::new();
    }

    let compiled = match JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(error) => {
            let message = error.to_string();
            warn!(error = %message, "Tool declares an invalid parameter schema");
            return vec![format!("invalid parameter schema: {message}")];
        }
    };

    let outcome = compiled
        .validate(args)
        .map_err(|errors| errors.map(|e| e.to_string()).collect::<Vec<_>>());
    match outcome {
        Ok(()) => Vec::new(),
        Err(errors) => errors,
    }
}
