//! Token endpoint client
//!
//! Builds the form-encoded token requests, authenticates the client and maps
//! endpoint failures to [`AuthError::Endpoint`] with a stable kind.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use brokerlink_common::time::{Clock, SystemClock};
use tracing::{debug, warn};

use crate::config::OAuthConfig;
use crate::coordinator::TokenRefresher;
use crate::error::{AuthError, AuthErrorKind};
use crate::transport::{TokenTransport, TransportRequest};
use crate::types::{OAuthErrorBody, TokenData, TokenResponse};

/// A token request grant.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode { code: String, code_verifier: String },
    RefreshToken { refresh_token: String },
}

impl TokenGrant {
    pub const fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant").field("grant_type", &self.grant_type()).finish_non_exhaustive()
    }
}

/// Calls `{issuer}/oauth/token` over an injected [`TokenTransport`].
pub struct TokenEndpointClient {
    config: Arc<OAuthConfig>,
    transport: Arc<dyn TokenTransport>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenEndpointClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEndpointClient")
            .field("token_url", &self.config.token_url())
            .finish_non_exhaustive()
    }
}

impl TokenEndpointClient {
    pub fn new(config: Arc<OAuthConfig>, transport: Arc<dyn TokenTransport>) -> Self {
        Self { config, transport, clock: Arc::new(SystemClock) }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Form fields for `grant`.
    ///
    /// `client_secret` is sent both in the body and as HTTP Basic credentials
    /// so providers accepting either scheme work.
    pub fn form_params(&self, grant: &TokenGrant) -> Vec<(String, String)> {
        let mut form = vec![("grant_type".to_string(), grant.grant_type().to_string())];
        match grant {
            TokenGrant::AuthorizationCode { code, code_verifier } => {
                form.push(("code".to_string(), sanitize_authorization_code(code)));
                form.push(("redirect_uri".to_string(), self.config.redirect_uri.clone()));
                form.push(("client_id".to_string(), self.config.client_id.clone()));
                form.push(("code_verifier".to_string(), code_verifier.clone()));
            }
            TokenGrant::RefreshToken { refresh_token } => {
                form.push(("refresh_token".to_string(), refresh_token.clone()));
                form.push(("client_id".to_string(), self.config.client_id.clone()));
            }
        }
        if let Some(secret) = self.client_secret() {
            form.push(("client_secret".to_string(), secret.to_string()));
        }
        form
    }

    /// POST `grant` to the token endpoint and parse the success body.
    ///
    /// # Errors
    /// - `AuthError::Network` when no HTTP response was received
    /// - `AuthError::Endpoint` for a non-2xx status
    /// - `AuthError::InvalidResponse` for a 2xx body without a usable
    ///   `access_token`
    pub async fn perform_direct_token_exchange(
        &self,
        grant: &TokenGrant,
    ) -> Result<TokenResponse, AuthError> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if let Some(secret) = self.client_secret() {
            let credentials = STANDARD.encode(format!("{}:{secret}", self.config.client_id));
            headers.push(("Authorization".to_string(), format!("Basic {credentials}")));
        }

        let request = TransportRequest {
            url: self.config.token_url(),
            headers,
            form: self.form_params(grant),
        };

        debug!(grant_type = grant.grant_type(), url = %request.url, "Requesting tokens");
        let response = self.transport.post_form(request).await?;

        if !response.is_success() {
            let err = map_endpoint_error(response.status, &response.body);
            warn!(
                grant_type = grant.grant_type(),
                status = response.status,
                kind = %err.kind(),
                "Token endpoint rejected request"
            );
            return Err(err);
        }

        let parsed: TokenResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(format!("malformed token response: {e}")))?;
        if parsed.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("access_token is empty".to_string()));
        }
        Ok(parsed)
    }

    /// Exchange an authorization code and PKCE verifier for tokens.
    ///
    /// # Errors
    /// See [`Self::perform_direct_token_exchange`].
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenData, AuthError> {
        let grant = TokenGrant::AuthorizationCode {
            code: code.to_string(),
            code_verifier: code_verifier.to_string(),
        };
        let response = self.perform_direct_token_exchange(&grant).await?;
        Ok(response.into_token_data(self.clock.millis_since_epoch(), None))
    }

    /// Redeem a refresh token. A response without `refresh_token` keeps the
    /// one that was sent.
    ///
    /// # Errors
    /// See [`Self::perform_direct_token_exchange`].
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenData, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::RefreshNeeded("refresh token is empty".to_string()));
        }
        let grant = TokenGrant::RefreshToken { refresh_token: refresh_token.to_string() };
        let response = self.perform_direct_token_exchange(&grant).await?;
        Ok(response.into_token_data(self.clock.millis_since_epoch(), Some(refresh_token)))
    }

    fn client_secret(&self) -> Option<&str> {
        self.config.client_secret.as_deref().filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl TokenRefresher for TokenEndpointClient {
    async fn refresh(&self, current: &TokenData) -> Result<TokenData, AuthError> {
        let refresh_token = current
            .refresh_token()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::RefreshNeeded("no refresh token available".to_string()))?;
        self.refresh_access_token(refresh_token).await
    }
}

/// Normalize an authorization code pasted from a redirect URL.
///
/// Trims whitespace and decodes only `%40 %7E %2B %2F %3D %20`
/// (case-insensitive). Everything else, including `.` and `%2E`, is kept
/// verbatim since some providers embed literal escapes in their codes.
pub fn sanitize_authorization_code(code: &str) -> String {
    const ESCAPES: [(&str, char); 6] =
        [("40", '@'), ("7E", '~'), ("2B", '+'), ("2F", '/'), ("3D", '='), ("20", ' ')];

    let code = code.trim();
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let decoded = tail.get(..2).and_then(|hex| {
            ESCAPES.iter().find(|(escape, _)| escape.eq_ignore_ascii_case(hex)).map(|(_, c)| *c)
        });
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[2..];
            }
            None => {
                out.push('%');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Map a non-2xx token endpoint response to [`AuthError::Endpoint`].
///
/// The OAuth `error` code wins over the status: `invalid_grant` is
/// `INVALID_CODE`, `invalid_client` is `UNAUTHORIZED`, `expired_token` is
/// `TOKEN_EXPIRED`. Otherwise 401 is `UNAUTHORIZED`, 400 is `INVALID_CODE` and
/// anything else `UNKNOWN`.
pub fn map_endpoint_error(status: u16, body: &str) -> AuthError {
    let parsed: OAuthErrorBody = serde_json::from_str(body).unwrap_or_default();

    let kind = match parsed.error.as_deref() {
        Some("invalid_grant") => AuthErrorKind::InvalidCode,
        Some("invalid_client") => AuthErrorKind::Unauthorized,
        Some("expired_token") => AuthErrorKind::TokenExpired,
        _ => match status {
            401 => AuthErrorKind::Unauthorized,
            400 => AuthErrorKind::InvalidCode,
            _ => AuthErrorKind::Unknown,
        },
    };

    let message = match (&parsed.error, &parsed.error_description) {
        (Some(code), Some(description)) => format!("{code}: {description}"),
        (Some(code), None) => code.clone(),
        (None, Some(description)) => description.clone(),
        (None, None) => format!("HTTP {status}"),
    };

    AuthError::Endpoint { kind, status, oauth_error: parsed.error, message, body: body.to_string() }
}
