//! Error classification shared across brokerlink crates
//!
//! Crate-specific error enums stay in their own crates and implement
//! [`ErrorClassification`] so that retry loops, logging and alerting can make
//! decisions without knowing the concrete error type.
//!
//! ```rust,ignore
//! #[derive(Debug, Error)]
//! pub enum StoreError {
//!     #[error("backend unavailable: {0}")]
//!     Backend(String),
//!     #[error("corrupt record: {0}")]
//!     Corrupt(String),
//! }
//!
//! impl ErrorClassification for StoreError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::Backend(_))
//!     }
//!     // ... implement other trait methods
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Standard interface for classifying errors
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as:
    /// - Network timeouts and connection resets
    /// - Rate limiting (HTTP 429)
    /// - Temporary service unavailability (HTTP 5xx)
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for monitoring, alerting, and logging decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when a specific delay is recommended (e.g.
    /// from a Retry-After header), or `None` to use the caller's backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// HTTP status codes that indicate a transient server-side condition.
///
/// Covers every 5xx, `429 Too Many Requests` and `408 Request Timeout`.
#[must_use]
pub const fn is_transient_http_status(status: u16) -> bool {
    matches!(status, 500..=599 | 429 | 408)
}
