//! Retry logic with configurable backoff strategies

use crate::error::LedgerError;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Configuration for store transactions that lost an optimistic race
    pub fn transactions(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry policy that determines whether to retry and how long to wait
pub trait RetryPolicy<E>: Send + Sync {
    fn should_retry(&self, attempt: u32, error: &E) -> bool;
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff that retries only `Transient` ledger errors
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy<LedgerError> for ExponentialBackoff {
    fn should_retry(&self, attempt: u32, error: &LedgerError) -> bool {
        attempt < self.config.max_attempts && error.is_retryable()
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64;
        let exponential_delay =
            base_delay * self.config.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let mut delay = Duration::from_millis(exponential_delay as u64);

        if delay > self.config.max_delay {
            delay = self.config.max_delay;
        }

        if self.config.jitter {
            // up to 25% extra so racing writers drift apart
            let jitter = (delay.as_millis() as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay += Duration::from_millis(jitter);
        }

        delay
    }
}

/// Retry an async operation with a given policy
pub async fn retry_async_with_policy<T, E, F, Fut>(
    operation: F,
    policy: &dyn RetryPolicy<E>,
    operation_name: &str,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if policy.should_retry(attempt, &err) {
                    let delay = policy.delay(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying async operation after delay"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    return Err(err);
                }
            }
        }
    }
}
