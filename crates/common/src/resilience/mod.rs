//! Resilience patterns for fault tolerance
//!
//! - **Retry Logic**: configurable retry strategies with linear or exponential
//!   backoff, gated by a [`RetryPolicy`] that classifies each
//!   failure before any sleep happens.
//!
//! The implementations are generic over the error type so domain crates plug
//! in their own classification.

pub mod retry;

pub use retry::{
    BackoffStrategy, RetryConfig, RetryDecision, RetryError, RetryExecutor, RetryOutcome,
    RetryPolicy, RetryResult,
};
