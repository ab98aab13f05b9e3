//! Retry logic with exponential backoff
//!
//! Transient provider failures (rate limits, network errors, 5xx) are
//! retried before a run gives up. Backoff sleeps end early on abort.

use pi_ai::Error as ProviderError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Add random jitter to delays
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// Whether rate limit errors are retried
    #[serde(default = "default_true")]
    pub retry_on_rate_limit: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            retry_on_rate_limit: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Never retry
    #[must_use]
    pub fn disabled() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Set maximum retries
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set maximum delay
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Enable or disable retrying rate limits
    #[must_use]
    pub fn with_retry_on_rate_limit(mut self, retry: bool) -> Self {
        self.retry_on_rate_limit = retry;
        self
    }

    /// Backoff delay after the given attempt (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt.max(1) as i32 - 1);

        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        let final_delay = if self.jitter {
            // Up to 25% jitter
            delay_ms + rand_jitter(delay_ms / 4)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    /// Delay before retrying `error`, preferring the provider's hint
    #[must_use]
    pub fn delay_for_error(&self, error: &ProviderError, attempt: u32) -> Duration {
        match error.retry_after() {
            Some(hint) => hint.min(Duration::from_millis(self.max_delay_ms)),
            None => self.delay_for(attempt),
        }
    }

    /// Whether `error` should be retried after `retries_done` retries
    #[must_use]
    pub fn should_retry(&self, error: &ProviderError, retries_done: u32) -> bool {
        retries_done < self.max_retries
            && error.is_transient()
            && (self.retry_on_rate_limit || !error.is_rate_limit())
    }
}

/// Simple pseudo-random jitter from the clock
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos % max
}

/// Error returned once retries are exhausted or not applicable
#[derive(Debug, Clone)]
pub struct RetryError {
    /// The last error encountered; [`ProviderError::Aborted`] when cancelled during backoff
    pub last_error: ProviderError,
    /// Total number of attempts made
    pub attempts: u32,
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.attempts > 1 {
            write!(
                f,
                "{} (after {} attempts)",
                self.last_error, self.attempts
            )
        } else {
            write!(f, "{}", self.last_error)
        }
    }
}

impl std::error::Error for RetryError {}

/// Run a provider operation, retrying transient failures with backoff.
///
/// `operation` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = pi_ai::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Provider request succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if !config.should_retry(&error, attempt - 1) {
                    debug!(attempt, error = %error, "Provider request failed, no more retries");
                    return Err(RetryError {
                        last_error: error,
                        attempts: attempt,
                    });
                }

                let delay = config.delay_for_error(&error, attempt);
                warn!(
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Provider request failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(RetryError {
                            last_error: ProviderError::Aborted,
                            attempts: attempt,
                        });
                    }
                    _ = sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests;
