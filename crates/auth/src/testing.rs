//! Test doubles for the injected boundaries
//!
//! Used by this crate's tests and available to applications testing code
//! built on [`crate::TokenManager`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::coordinator::TokenRefresher;
use crate::error::{AuthError, StoreError};
use crate::store::TokenStore;
use crate::transport::{TokenTransport, TransportError, TransportRequest, TransportResponse};
use crate::types::TokenData;

/// In-memory [`TokenStore`] that records saves and can be told to fail.
#[derive(Debug, Default)]
pub struct MockTokenStore {
    tokens: RwLock<Option<TokenData>>,
    saves: Mutex<Vec<TokenData>>,
    load_failure: Mutex<Option<String>>,
    save_failure: Mutex<Option<String>>,
    loads: AtomicUsize,
}

impl MockTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenData) -> Self {
        let store = Self::new();
        *store.tokens.write() = Some(tokens);
        store
    }

    /// Make every load fail with `StoreError::Backend(message)`.
    pub fn fail_loads(&self, message: impl Into<String>) {
        *self.load_failure.lock() = Some(message.into());
    }

    /// Make every save fail with `StoreError::Backend(message)`.
    pub fn fail_saves(&self, message: impl Into<String>) {
        *self.save_failure.lock() = Some(message.into());
    }

    /// Clear injected failures.
    pub fn recover(&self) {
        *self.load_failure.lock() = None;
        *self.save_failure.lock() = None;
    }

    /// Every record passed to `save`, including failed attempts.
    pub fn saves(&self) -> Vec<TokenData> {
        self.saves.lock().clone()
    }

    pub fn last_saved(&self) -> Option<TokenData> {
        self.saves.lock().last().cloned()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<TokenData> {
        self.tokens.read().clone()
    }
}

#[async_trait]
impl TokenStore for MockTokenStore {
    async fn load(&self) -> Result<Option<TokenData>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.load_failure.lock().clone() {
            return Err(StoreError::Backend(message));
        }
        Ok(self.tokens.read().clone())
    }

    async fn save(&self, tokens: &TokenData) -> Result<(), StoreError> {
        self.saves.lock().push(tokens.clone());
        if let Some(message) = self.save_failure.lock().clone() {
            return Err(StoreError::Backend(message));
        }
        *self.tokens.write() = Some(tokens.clone());
        Ok(())
    }
}

/// [`TokenRefresher`] returning scripted results in order.
///
/// An exhausted script yields `AuthError::Unknown`.
#[derive(Debug, Default)]
pub struct ScriptedRefresher {
    script: Mutex<VecDeque<Result<TokenData, AuthError>>>,
    seen: Mutex<Vec<TokenData>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every attempt.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_ok(&self, tokens: TokenData) {
        self.script.lock().push_back(Ok(tokens));
    }

    pub fn push_err(&self, error: AuthError) {
        self.script.lock().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Tokens passed to each attempt.
    pub fn seen(&self) -> Vec<TokenData> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl TokenRefresher for ScriptedRefresher {
    async fn refresh(&self, current: &TokenData) -> Result<TokenData, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(current.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Unknown("refresh script exhausted".to_string())))
    }
}

/// [`TokenTransport`] returning scripted responses and recording requests.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<TransportResponse, TransportError>) {
        self.responses.lock().push_back(response);
    }

    pub fn push_json(&self, status: u16, body: &str) {
        self.push(Ok(TransportResponse { status, body: body.to_string() }));
    }

    pub fn push_network_error(&self, message: &str) {
        self.push(Err(TransportError::new(message)));
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TokenTransport for MockTransport {
    async fn post_form(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("no scripted response")))
    }
}
