//! Generic retry strategy implementation with proper error handling and
//! extensibility
//!
//! The executor runs an async operation up to `max_attempts` times. After each
//! failure the [`RetryPolicy`] is consulted *before* any sleep happens, so a
//! non-retryable error ends the loop immediately. The delay before attempt
//! `n` (0-based, so the first retry is `n = 1`) is
//! [`BackoffStrategy::calculate_delay`]`(n)`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retry attempts have been exhausted
    #[error("All retry attempts exhausted after {attempts} tries: {error}")]
    AttemptsExhausted { attempts: u32, error: E },

    /// The operation failed with a non-retryable error
    #[error("Operation failed with non-retryable error after {attempts} tries: {error}")]
    NonRetryable { attempts: u32, error: E },

    /// The retry strategy configuration is invalid
    #[error("Invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Outcome of a retry execution including result and summary statistics.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: RetryResult<T, E>,
    /// Attempts actually made, including the successful one.
    pub attempts: u32,
    /// Sum of all backoff sleeps.
    pub total_delay: Duration,
}

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Decide whether the failed attempt number `attempt` (1-based) should be
    /// followed by another one.
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the configured backoff delay
    Retry,
    /// Don't retry the operation
    Stop,
}

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Linear backoff: `min(initial_delay + attempt * increment, max_delay)`
    Linear { initial_delay: Duration, increment: Duration, max_delay: Duration },
    /// Exponential backoff: `min(initial_delay * base^attempt, max_delay)`
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay to wait before the given attempt index
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Linear { initial_delay, increment, max_delay } => {
                (*initial_delay + increment.saturating_mul(attempt)).min(*max_delay)
            }
            Self::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let delay = initial_delay.as_millis() as f64 * base.powi(exponent);
                let delay_ms = delay.min(max_delay.as_millis() as f64) as u64;
                Duration::from_millis(delay_ms)
            }
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(1000),
                base: 2.0,
                max_delay: Duration::from_secs(30),
            },
        }
    }
}

impl RetryConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RetryError<()>> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfiguration {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }

        if let BackoffStrategy::Exponential { base, .. } = &self.backoff {
            if *base <= 0.0 {
                return Err(RetryError::InvalidConfiguration {
                    message: "exponential base must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub const fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    /// Execute an operation with retry logic and return outcome statistics.
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute_with_outcome<F, Fut, T, E>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(RetryError::InvalidConfiguration { message }) = self.config.validate() {
            return RetryOutcome {
                result: Err(RetryError::InvalidConfiguration { message }),
                attempts: 0,
                total_delay: Duration::ZERO,
            };
        }

        let mut total_delay = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!("Executing operation (attempt {}/{})", attempt, self.config.max_attempts);

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded after {} retries", attempt - 1);
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay };
                }
                Err(error) => error,
            };

            if self.policy.should_retry(&error, attempt) == RetryDecision::Stop {
                debug!(attempt, error = %error, "Retry policy determined not to retry");
                return RetryOutcome {
                    result: Err(RetryError::NonRetryable { attempts: attempt, error }),
                    attempts: attempt,
                    total_delay,
                };
            }

            if attempt >= self.config.max_attempts {
                warn!(
                    "All retry attempts exhausted after {} tries, last error: {}",
                    attempt, error
                );
                return RetryOutcome {
                    result: Err(RetryError::AttemptsExhausted { attempts: attempt, error }),
                    attempts: attempt,
                    total_delay,
                };
            }

            let delay = self.config.backoff.calculate_delay(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );
            tokio::time::sleep(delay).await;
            total_delay += delay;
        }
    }
}
