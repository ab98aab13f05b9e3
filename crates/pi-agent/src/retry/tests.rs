use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn fast() -> RetryConfig {
    RetryConfig::new()
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false)
}

#[test]
fn test_retry_config_defaults() {
    let config = RetryConfig::default();
    assert_eq!(config.max_retries, 3);
    assert_eq!(config.initial_delay_ms, 1000);
    assert_eq!(config.backoff_multiplier, 2.0);
    assert!(config.retry_on_rate_limit);
}

#[test]
fn test_delay_for() {
    let config = RetryConfig::new()
        .with_initial_delay(Duration::from_millis(100))
        .with_backoff_multiplier(2.0)
        .with_jitter(false);

    assert_eq!(config.delay_for(1), Duration::from_millis(100));
    assert_eq!(config.delay_for(2), Duration::from_millis(200));
    assert_eq!(config.delay_for(3), Duration::from_millis(400));
}

#[test]
fn test_delay_respects_max() {
    let config = RetryConfig::new()
        .with_initial_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(5))
        .with_backoff_multiplier(10.0)
        .with_jitter(false);

    assert_eq!(config.delay_for(3), Duration::from_secs(5));
}

#[test]
fn test_jitter_stays_within_quarter() {
    let config = RetryConfig::new().with_initial_delay(Duration::from_millis(400));
    let delay = config.delay_for(1);
    assert!(delay >= Duration::from_millis(400));
    assert!(delay < Duration::from_millis(500));
}

#[test]
fn test_retry_after_hint_is_capped() {
    let config = RetryConfig::new().with_max_delay(Duration::from_secs(2));
    let err = ProviderError::RateLimit {
        retry_after_ms: Some(60_000),
    };
    assert_eq!(config.delay_for_error(&err, 1), Duration::from_secs(2));
}

#[test]
fn test_should_retry() {
    let config = RetryConfig::new().with_max_retries(2);
    let transient = ProviderError::Network("reset".into());
    let terminal = ProviderError::InvalidRequest("bad".into());
    let limited = ProviderError::RateLimit {
        retry_after_ms: None,
    };

    assert!(config.should_retry(&transient, 0));
    assert!(config.should_retry(&transient, 1));
    assert!(!config.should_retry(&transient, 2));
    assert!(!config.should_retry(&terminal, 0));
    assert!(config.should_retry(&limited, 0));
    assert!(!config
        .clone()
        .with_retry_on_rate_limit(false)
        .should_retry(&limited, 0));
}

#[tokio::test]
async fn test_success_after_transient_failures() {
    let counter = Arc::new(AtomicU32::new(0));
    let cancel = CancellationToken::new();

    let result = retry_with_backoff(&fast(), &cancel, |_| {
        let c = Arc::clone(&counter);
        async move {
            if c.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Timeout(10))
            } else {
                Ok(42)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_budget_exhausted() {
    let counter = Arc::new(AtomicU32::new(0));
    let cancel = CancellationToken::new();

    let result: Result<(), RetryError> =
        retry_with_backoff(&fast().with_max_retries(2), &cancel, |_| {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Network("down".into()))
            }
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.attempts, 3);
    assert_eq!(err.last_error, ProviderError::Network("down".into()));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert!(err.to_string().contains("after 3 attempts"));
}

#[tokio::test]
async fn test_terminal_error_is_not_retried() {
    let counter = Arc::new(AtomicU32::new(0));
    let cancel = CancellationToken::new();

    let result: Result<(), RetryError> = retry_with_backoff(&fast(), &cancel, |_| {
        let c = Arc::clone(&counter);
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Auth("bad key".into()))
        }
    })
    .await;

    assert_eq!(result.unwrap_err().attempts, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_interrupts_backoff() {
    let cancel = CancellationToken::new();
    let config = RetryConfig::new()
        .with_initial_delay(Duration::from_secs(60))
        .with_jitter(false);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result: Result<(), RetryError> = retry_with_backoff(&config, &cancel, |_| async {
        Err(ProviderError::Network("down".into()))
    })
    .await;

    assert_eq!(result.unwrap_err().last_error, ProviderError::Aborted);
    assert!(started.elapsed() < Duration::from_secs(5));
}
