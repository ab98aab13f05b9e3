//! Model - Descriptor of the model a conversation talks to

use serde::{Deserialize, Serialize};

/// Model descriptor passed to a [`ModelStreamer`](crate::ModelStreamer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Provider-side model identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Wire API the model is served through
    pub api: String,
    /// Provider name
    pub provider: String,
    /// Base URL of the provider endpoint
    #[serde(default)]
    pub base_url: String,
    /// Whether the model supports reasoning output
    #[serde(default)]
    pub reasoning: bool,
    /// Context window in tokens
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_context_window() -> u32 {
    128_000
}

fn default_max_tokens() -> u32 {
    8_192
}

impl Model {
    /// Create a model descriptor
    #[must_use]
    pub fn new(id: impl Into<String>, provider: impl Into<String>, api: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            api: api.into(),
            provider: provider.into(),
            base_url: String::new(),
            reasoning: false,
            context_window: default_context_window(),
            max_tokens: default_max_tokens(),
        }
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Mark the model as reasoning-capable
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = reasoning;
        self
    }
}

/// How much reasoning effort to request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    /// No reasoning
    #[default]
    Off,
    /// Minimal
    Minimal,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Extra high
    XHigh,
}

impl ThinkingLevel {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::XHigh => "xhigh",
        }
    }

    /// Reasoning level to request from the provider, `None` when off
    #[must_use]
    pub fn reasoning(self) -> Option<Self> {
        match self {
            Self::Off => None,
            level => Some(level),
        }
    }
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
