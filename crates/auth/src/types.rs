//! Token value objects and OAuth wire types

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Error type returned by user-supplied callbacks and event listeners.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Access/refresh credential pair with an absolute expiry.
///
/// Values are replaced wholesale, never patched: every refresh produces a new
/// `TokenData`. `expires_at` is epoch milliseconds. The all-empty record from
/// [`TokenData::cleared`] is the logout marker written to storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_at: i64,
}

impl TokenData {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: i64,
    ) -> Self {
        Self { access_token: access_token.into(), refresh_token, expires_at }
    }

    /// The logout marker: empty access token, no refresh token, expiry 0.
    #[must_use]
    pub const fn cleared() -> Self {
        Self { access_token: String::new(), refresh_token: None, expires_at: 0 }
    }

    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.access_token.is_empty() && self.refresh_token.is_none() && self.expires_at == 0
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub const fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// True when a non-empty refresh token is present.
    #[must_use]
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// True when the token expires at or before `now_ms + threshold_ms`.
    #[must_use]
    pub const fn expires_within(&self, now_ms: i64, threshold_ms: i64) -> bool {
        self.expires_at <= now_ms.saturating_add(threshold_ms)
    }

    /// Milliseconds until expiry (negative once expired).
    #[must_use]
    pub const fn millis_until_expiry(&self, now_ms: i64) -> i64 {
        self.expires_at.saturating_sub(now_ms)
    }

    /// Copy of this record carrying a different refresh token.
    #[must_use]
    pub fn with_refresh_token(&self, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: self.access_token.clone(),
            refresh_token: Some(refresh_token.into()),
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for TokenData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenData")
            .field("access_token", &Redacted(self.access_token.len()))
            .field("refresh_token", &self.refresh_token.as_ref().map(|t| Redacted(t.len())))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

struct Redacted(usize);

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted {} chars>", self.0)
    }
}

/// Options for [`crate::TokenManager::refresh_if_needed`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Refresh even when the current token is not near expiry.
    pub force: bool,
    /// Use this refresh token instead of the stored one.
    pub refresh_token: Option<String>,
}

impl RefreshOptions {
    #[must_use]
    pub fn forced() -> Self {
        Self { force: true, refresh_token: None }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

impl fmt::Debug for RefreshOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshOptions")
            .field("force", &self.force)
            .field("refresh_token", &self.refresh_token.as_ref().map(|t| Redacted(t.len())))
            .finish()
    }
}

/// Options for building an authorization URL.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationOptions {
    /// Overrides the configured scope.
    pub scope: Option<String>,
    /// Opaque application state round-tripped through the provider.
    pub state: Option<serde_json::Value>,
}

/// Result of [`crate::TokenManager::get_authorization_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationUrl {
    /// Full provider URL to open in the user's browser.
    pub auth_url: String,
    /// The encoded `state` parameter embedded in `auth_url`.
    pub generated_state: String,
}

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Lifetime assumed when the provider omits `expires_in`.
    pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

    /// Convert to [`TokenData`], anchoring expiry at `now_ms`.
    ///
    /// Providers that do not rotate refresh tokens omit `refresh_token`; the
    /// previous one is carried forward in that case.
    #[must_use]
    pub fn into_token_data(self, now_ms: i64, previous_refresh_token: Option<&str>) -> TokenData {
        let expires_in = self.expires_in.unwrap_or(Self::DEFAULT_EXPIRES_IN_SECS);
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh_token.map(str::to_owned));

        TokenData {
            access_token: self.access_token,
            refresh_token,
            expires_at: now_ms.saturating_add(expires_in.saturating_mul(1000)),
        }
    }
}

/// OAuth error body (RFC 6749 §5.2).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}
