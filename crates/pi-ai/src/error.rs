//! Error types for pi-ai

use std::time::Duration;
use thiserror::Error;

/// Provider error type
///
/// Every variant carries owned data so the error can be cloned into
/// terminal results and replayed to several listeners.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Rate limit exceeded
    #[error("rate limit exceeded")]
    RateLimit {
        /// Provider hint for when to retry, in milliseconds
        retry_after_ms: Option<u64>,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Server returned an error status
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP-like status code
        status: u16,
        /// Error message from the provider
        message: String,
    },

    /// The request was rejected as invalid
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Invalid response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request was aborted by the caller
    #[error("request aborted")]
    Aborted,

    /// Posting to a stream that already produced its terminal result
    #[error("stream closed")]
    StreamClosed,
}

impl Error {
    /// Whether retrying the same request may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimit { .. } | Self::Network(_) | Self::Timeout(_) => true,
            Self::Server { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidRequest(_)
            | Self::Auth(_)
            | Self::InvalidResponse(_)
            | Self::Aborted
            | Self::StreamClosed => false,
        }
    }

    /// Whether this error is a rate limit
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Server { status: 429, .. })
    }

    /// Retry delay suggested by the provider, if any
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
