//! Shared building blocks for the brokerlink crates.
//!
//! # Feature Tiers
//!
//! - `foundation`: error classification ([`error`])
//! - `runtime`: retry/backoff executor ([`resilience`]) and clock
//!   abstractions ([`time`])

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;
#[cfg(feature = "runtime")]
pub mod time;

#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{BackoffStrategy, RetryConfig, RetryDecision, RetryExecutor, RetryPolicy};
#[cfg(feature = "runtime")]
pub use time::{Clock, MockClock, SystemClock};
