//! Error types for the token lifecycle
//!
//! Every failure surfaced to callers is an [`AuthError`]. Its
//! [`AuthError::kind`] gives a stable, matchable code; wrapped refresh
//! failures report the kind of their underlying cause.

use std::fmt;

use brokerlink_common::error::{is_transient_http_status, ErrorClassification, ErrorSeverity};
use thiserror::Error;

/// Stable error codes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    InvalidCode,
    Unauthorized,
    TokenExpired,
    RefreshNeeded,
    PkceVerifierMissing,
    PersistenceLoadFailed,
    PersistenceSaveFailed,
    Network,
    Config,
    Unknown,
}

impl AuthErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidCode => "INVALID_CODE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::RefreshNeeded => "REFRESH_NEEDED",
            Self::PkceVerifierMissing => "PKCE_VERIFIER_MISSING",
            Self::PersistenceLoadFailed => "TOKEN_PERSISTENCE_LOAD_FAILED",
            Self::PersistenceSaveFailed => "TOKEN_PERSISTENCE_SAVE_FAILED",
            Self::Network => "NETWORK",
            Self::Config => "CONFIG",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// How the refresh retry loop should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    NonRetryable,
    /// No rule matched; the configured unknown-error policy decides.
    Unclassified,
}

/// OAuth error codes that will never succeed on retry.
const PERMANENT_OAUTH_ERRORS: [&str; 3] = ["invalid_grant", "invalid_client", "invalid_request"];

/// Mapped endpoint kinds that will never succeed on retry.
const PERMANENT_KINDS: [AuthErrorKind; 3] =
    [AuthErrorKind::InvalidCode, AuthErrorKind::Unauthorized, AuthErrorKind::TokenExpired];

/// Failures raised by a [`crate::store::TokenStore`] backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored token record is corrupt: {0}")]
    Corrupt(String),
}

/// Errors produced by the token lifecycle.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The token endpoint answered with a non-success status.
    #[error("token endpoint returned HTTP {status}: {message}")]
    Endpoint {
        kind: AuthErrorKind,
        status: u16,
        /// The RFC 6749 `error` code, when the body carried one.
        oauth_error: Option<String>,
        message: String,
        /// Raw response body.
        body: String,
    },

    /// The request never produced an HTTP response.
    #[error("network error calling token endpoint: {message}")]
    Network { message: String, timeout: bool },

    /// No usable refresh token; the user must authorize again.
    #[error("token refresh needed: {0}")]
    RefreshNeeded(String),

    #[error("PKCE code verifier missing: {0}")]
    PkceVerifierMissing(String),

    #[error("failed to load persisted tokens: {0}")]
    PersistenceLoadFailed(#[source] StoreError),

    #[error("failed to persist tokens: {0}")]
    PersistenceSaveFailed(#[source] StoreError),

    /// The refresh loop gave up.
    #[error("token refresh failed after {attempts} attempt(s): {source}")]
    RefreshFailed {
        attempts: u32,
        #[source]
        source: Box<AuthError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    /// A 2xx response whose body could not be used.
    #[error("invalid token endpoint response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Unknown(String),
}

impl AuthError {
    /// Stable code for this error; wrapped refresh failures report their cause.
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::Endpoint { kind, .. } => *kind,
            Self::Network { .. } => AuthErrorKind::Network,
            Self::RefreshNeeded(_) => AuthErrorKind::RefreshNeeded,
            Self::PkceVerifierMissing(_) => AuthErrorKind::PkceVerifierMissing,
            Self::PersistenceLoadFailed(_) => AuthErrorKind::PersistenceLoadFailed,
            Self::PersistenceSaveFailed(_) => AuthErrorKind::PersistenceSaveFailed,
            Self::RefreshFailed { source, .. } => source.kind(),
            Self::Config(_) => AuthErrorKind::Config,
            Self::InvalidResponse(_) | Self::Unknown(_) => AuthErrorKind::Unknown,
        }
    }

    /// HTTP status of the failing response, looking through wrappers.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Endpoint { status, .. } => Some(*status),
            Self::RefreshFailed { source, .. } => source.status(),
            _ => None,
        }
    }

    /// RFC 6749 `error` code, looking through wrappers.
    pub fn oauth_error(&self) -> Option<&str> {
        match self {
            Self::Endpoint { oauth_error, .. } => oauth_error.as_deref(),
            Self::RefreshFailed { source, .. } => source.oauth_error(),
            _ => None,
        }
    }

    /// Number of refresh attempts, when this error came out of the retry loop.
    pub const fn attempts(&self) -> Option<u32> {
        match self {
            Self::RefreshFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Classification consulted by the refresh retry loop after each attempt.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Endpoint { kind, status, oauth_error, .. } => {
                let permanent_code = oauth_error
                    .as_deref()
                    .is_some_and(|code| PERMANENT_OAUTH_ERRORS.contains(&code));
                if permanent_code || *status == 401 || PERMANENT_KINDS.contains(kind) {
                    RetryClass::NonRetryable
                } else if is_transient_http_status(*status) {
                    RetryClass::Retryable
                } else {
                    RetryClass::Unclassified
                }
            }
            Self::Network { .. }
            | Self::PersistenceLoadFailed(_)
            | Self::PersistenceSaveFailed(_) => RetryClass::Retryable,
            Self::RefreshNeeded(_)
            | Self::PkceVerifierMissing(_)
            | Self::RefreshFailed { .. }
            | Self::Config(_) => RetryClass::NonRetryable,
            Self::InvalidResponse(_) | Self::Unknown(_) => RetryClass::Unclassified,
        }
    }
}

impl ErrorClassification for AuthError {
    fn is_retryable(&self) -> bool {
        self.retry_class() == RetryClass::Retryable
    }

    fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            AuthErrorKind::Network
            | AuthErrorKind::TokenExpired
            | AuthErrorKind::RefreshNeeded
            | AuthErrorKind::PersistenceLoadFailed
            | AuthErrorKind::PersistenceSaveFailed => ErrorSeverity::Warning,
            AuthErrorKind::Config => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        self.kind() == AuthErrorKind::Config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(status: u16, oauth_error: Option<&str>, kind: AuthErrorKind) -> AuthError {
        AuthError::Endpoint {
            kind,
            status,
            oauth_error: oauth_error.map(str::to_owned),
            message: "test".to_string(),
            body: String::new(),
        }
    }

    /// Validates the retry classification table.
    ///
    /// Assertions:
    /// - 5xx, 429 and 408 are retryable.
    /// - `invalid_grant`, `invalid_client`, `invalid_request` and 401 are not,
    ///   even on a 5xx status.
    /// - Kinds `INVALID_CODE`, `UNAUTHORIZED` and `TOKEN_EXPIRED` are not,
    ///   whatever the status or OAuth code.
    /// - Other 4xx fall through to the unknown-error policy.
    #[test]
    fn test_retry_class_for_endpoint_errors() {
        for status in [500, 502, 503, 429, 408] {
            assert_eq!(
                endpoint(status, None, AuthErrorKind::Unknown).retry_class(),
                RetryClass::Retryable
            );
        }
        for code in ["invalid_grant", "invalid_client", "invalid_request"] {
            assert_eq!(
                endpoint(503, Some(code), AuthErrorKind::Unknown).retry_class(),
                RetryClass::NonRetryable
            );
        }
        assert_eq!(
            endpoint(401, None, AuthErrorKind::Unauthorized).retry_class(),
            RetryClass::NonRetryable
        );
        for kind in
            [AuthErrorKind::InvalidCode, AuthErrorKind::Unauthorized, AuthErrorKind::TokenExpired]
        {
            assert_eq!(endpoint(400, None, kind).retry_class(), RetryClass::NonRetryable);
            assert_eq!(endpoint(503, None, kind).retry_class(), RetryClass::NonRetryable);
        }
        assert_eq!(
            endpoint(403, None, AuthErrorKind::Unknown).retry_class(),
            RetryClass::Unclassified
        );
    }

    #[test]
    fn test_local_conditions_are_not_retried() {
        assert_eq!(AuthError::RefreshNeeded("x".into()).retry_class(), RetryClass::NonRetryable);
        assert_eq!(AuthError::Config("x".into()).retry_class(), RetryClass::NonRetryable);
        assert_eq!(AuthError::Unknown("x".into()).retry_class(), RetryClass::Unclassified);
        assert!(AuthError::Network { message: "reset".into(), timeout: false }.is_retryable());
    }

    #[test]
    fn test_refresh_failed_reports_cause() {
        let err = AuthError::RefreshFailed {
            attempts: 1,
            source: Box::new(endpoint(400, Some("invalid_grant"), AuthErrorKind::InvalidCode)),
        };

        assert_eq!(err.kind(), AuthErrorKind::InvalidCode);
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.oauth_error(), Some("invalid_grant"));
        assert_eq!(err.attempts(), Some(1));
        assert!(err.to_string().starts_with("token refresh failed after 1 attempt(s)"));
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(AuthErrorKind::PersistenceLoadFailed.code(), "TOKEN_PERSISTENCE_LOAD_FAILED");
        assert_eq!(AuthErrorKind::PkceVerifierMissing.to_string(), "PKCE_VERIFIER_MISSING");
        assert_eq!(
            AuthError::PersistenceSaveFailed(StoreError::Backend("disk".into())).kind(),
            AuthErrorKind::PersistenceSaveFailed
        );
    }

    #[test]
    fn test_severity() {
        assert!(AuthError::Config("missing client id".into()).is_critical());
        assert_eq!(
            AuthError::Network { message: "timeout".into(), timeout: true }.severity(),
            ErrorSeverity::Warning
        );
        assert_eq!(
            endpoint(401, None, AuthErrorKind::Unauthorized).severity(),
            ErrorSeverity::Error
        );
    }
}
