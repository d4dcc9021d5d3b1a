//! HTTP transport for the token endpoint
//!
//! [`TokenTransport`] is the seam between the OAuth logic and the network:
//! it posts one form-encoded request and hands back the raw status and body.
//! Status interpretation lives in [`crate::exchange`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::AuthError;

/// Default request timeout for the token endpoint.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A form POST to the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
}

impl TransportRequest {
    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// Value of the form field `name`.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        let form_keys: Vec<&str> = self.form.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("TransportRequest")
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("form", &form_keys)
            .finish()
    }
}

/// Raw response from the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    /// Returns the `serde_json` error for a malformed body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// The request produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timeout: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), timeout: false }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self { message: message.into(), timeout: true }
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        Self::Network { message: err.message, timeout: err.timeout }
    }
}

/// Sends form POSTs to the token endpoint.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    /// Any HTTP status is a successful transport result; only connection
    /// level failures are errors.
    async fn post_form(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client with [`DEFAULT_TIMEOUT`].
    ///
    /// # Errors
    /// Returns `AuthError::Config` if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (proxies, custom roots, timeouts).
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenTransport for ReqwestTransport {
    async fn post_form(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.post(&request.url).form(&request.form);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| TransportError {
            message: format!("Request to token endpoint failed: {e}"),
            timeout: e.is_timeout(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| TransportError {
            message: format!("Failed to read token endpoint response: {e}"),
            timeout: e.is_timeout(),
        })?;

        Ok(TransportResponse { status, body })
    }
}
