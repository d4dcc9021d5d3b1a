//! Persistence boundary for tokens
//!
//! [`TokenPersistence`] wraps an optional [`TokenStore`] and adds what every
//! backend needs: shape validation of loaded records, lifecycle events for
//! observers, and consistent error mapping.
//!
//! ```text
//!   load()                                   save(tokens, metadata)
//!     │                                        │
//!     ▼                                        ▼
//!  store.load() ──Err──► TOKEN_LOAD_FAILED   store.save() ──Err──► TOKEN_SAVE_FAILED
//!     │                  + PersistenceLoadFailed   │               + PersistenceSaveFailed
//!     ▼ Some                                   ▼ Ok
//!  validate ──invalid──► TOKEN_VALIDATION_FAILED, None          TOKEN_SAVED
//!     │
//!     ▼ valid
//!  TOKEN_VALIDATED, TOKEN_LOADED
//! ```

pub mod codec;

use std::fmt;
use std::sync::Arc;

use brokerlink_common::time::{Clock, SystemClock};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::store::TokenStore;
use crate::types::{CallbackError, TokenData};

/// Lifecycle event kinds emitted by [`TokenPersistence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistenceEventKind {
    TokenSaved,
    TokenSaveFailed,
    TokenLoaded,
    TokenLoadFailed,
    TokenValidated,
    TokenValidationFailed,
}

impl PersistenceEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TokenSaved => "TOKEN_SAVED",
            Self::TokenSaveFailed => "TOKEN_SAVE_FAILED",
            Self::TokenLoaded => "TOKEN_LOADED",
            Self::TokenLoadFailed => "TOKEN_LOAD_FAILED",
            Self::TokenValidated => "TOKEN_VALIDATED",
            Self::TokenValidationFailed => "TOKEN_VALIDATION_FAILED",
        }
    }
}

impl fmt::Display for PersistenceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context attached to persistence events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMetadata {
    /// Caller-level operation, e.g. `"exchange"`, `"refresh"`, `"clear"`.
    pub operation: Option<String>,
    pub attempt: Option<u32>,
    /// Epoch milliseconds; filled from the persistence clock when zero.
    pub timestamp: i64,
}

impl EventMetadata {
    pub fn for_operation(operation: impl Into<String>) -> Self {
        Self { operation: Some(operation.into()), ..Self::default() }
    }

    #[must_use]
    pub const fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// A persistence lifecycle event.
#[derive(Debug, Clone)]
pub struct PersistenceEvent {
    pub kind: PersistenceEventKind,
    /// The record involved; [`TokenData::cleared`] when a load failed.
    pub tokens: TokenData,
    pub metadata: EventMetadata,
    /// Failure description for `*_FAILED` events.
    pub error: Option<String>,
}

/// Listener for [`PersistenceEvent`]s. Errors are logged, never propagated.
pub type EventListener = Arc<dyn Fn(&PersistenceEvent) -> Result<(), CallbackError> + Send + Sync>;

/// Why a loaded record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("access token is empty")]
    EmptyAccessToken,
    #[error("expiry {0} is not a positive timestamp")]
    NonPositiveExpiry(i64),
}

/// Load/save boundary with validation and event dispatch.
pub struct TokenPersistence {
    store: Option<Arc<dyn TokenStore>>,
    validate: bool,
    listeners: Vec<EventListener>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenPersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPersistence")
            .field("has_store", &self.store.is_some())
            .field("validate", &self.validate)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl TokenPersistence {
    pub fn builder() -> TokenPersistenceBuilder {
        TokenPersistenceBuilder::default()
    }

    /// Shape check applied to loaded records.
    ///
    /// A record is valid when its access token is non-empty and its expiry is
    /// a positive timestamp. An absent refresh token is valid.
    ///
    /// # Errors
    /// Returns the first [`ValidationFailure`] found.
    pub fn validate_tokens(tokens: &TokenData) -> Result<(), ValidationFailure> {
        if tokens.access_token().is_empty() {
            return Err(ValidationFailure::EmptyAccessToken);
        }
        if tokens.expires_at() <= 0 {
            return Err(ValidationFailure::NonPositiveExpiry(tokens.expires_at()));
        }
        Ok(())
    }

    pub const fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Load tokens from the store.
    ///
    /// Returns `Ok(None)` when nothing is stored, no store is configured, or
    /// the stored record fails validation.
    ///
    /// # Errors
    /// Returns `AuthError::PersistenceLoadFailed` when the backend fails.
    /// Callers must not treat this as "no tokens".
    pub async fn load(&self) -> Result<Option<TokenData>, AuthError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let metadata = self.stamp(EventMetadata::for_operation("load"));

        let tokens = match store.load().await {
            Ok(Some(tokens)) => tokens,
            Ok(None) => {
                debug!("No persisted tokens found");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted tokens");
                self.dispatch(&PersistenceEvent {
                    kind: PersistenceEventKind::TokenLoadFailed,
                    tokens: TokenData::cleared(),
                    metadata,
                    error: Some(e.to_string()),
                });
                return Err(AuthError::PersistenceLoadFailed(e));
            }
        };

        if self.validate {
            if let Err(failure) = Self::validate_tokens(&tokens) {
                warn!(reason = %failure, "Persisted tokens failed validation");
                self.dispatch(&PersistenceEvent {
                    kind: PersistenceEventKind::TokenValidationFailed,
                    tokens,
                    metadata,
                    error: Some(failure.to_string()),
                });
                return Ok(None);
            }
            self.dispatch(&PersistenceEvent {
                kind: PersistenceEventKind::TokenValidated,
                tokens: tokens.clone(),
                metadata: metadata.clone(),
                error: None,
            });
        }

        debug!(expires_at = tokens.expires_at(), "Persisted tokens loaded");
        self.dispatch(&PersistenceEvent {
            kind: PersistenceEventKind::TokenLoaded,
            tokens: tokens.clone(),
            metadata,
            error: None,
        });
        Ok(Some(tokens))
    }

    /// Save tokens to the store. A no-op without a store.
    ///
    /// # Errors
    /// Returns `AuthError::PersistenceSaveFailed` when the backend fails; the
    /// caller decides whether that aborts its operation.
    pub async fn save(&self, tokens: &TokenData, metadata: EventMetadata) -> Result<(), AuthError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let metadata = self.stamp(metadata);

        match store.save(tokens).await {
            Ok(()) => {
                debug!(operation = ?metadata.operation, "Tokens persisted");
                self.dispatch(&PersistenceEvent {
                    kind: PersistenceEventKind::TokenSaved,
                    tokens: tokens.clone(),
                    metadata,
                    error: None,
                });
                Ok(())
            }
            Err(e) => {
                warn!(operation = ?metadata.operation, error = %e, "Failed to persist tokens");
                self.dispatch(&PersistenceEvent {
                    kind: PersistenceEventKind::TokenSaveFailed,
                    tokens: tokens.clone(),
                    metadata,
                    error: Some(e.to_string()),
                });
                Err(AuthError::PersistenceSaveFailed(e))
            }
        }
    }

    fn stamp(&self, mut metadata: EventMetadata) -> EventMetadata {
        if metadata.timestamp == 0 {
            metadata.timestamp = self.clock.millis_since_epoch();
        }
        metadata
    }

    fn dispatch(&self, event: &PersistenceEvent) {
        let failures: Vec<String> = self
            .listeners
            .iter()
            .filter_map(|listener| listener(event).err().map(|e| e.to_string()))
            .collect();

        if !failures.is_empty() {
            warn!(
                event = %event.kind,
                failed_listeners = failures.len(),
                errors = ?failures,
                "Persistence event listeners failed"
            );
        }
    }
}

/// Builder for [`TokenPersistence`].
pub struct TokenPersistenceBuilder {
    store: Option<Arc<dyn TokenStore>>,
    validate: bool,
    listeners: Vec<EventListener>,
    clock: Arc<dyn Clock>,
}

impl Default for TokenPersistenceBuilder {
    fn default() -> Self {
        Self { store: None, validate: true, listeners: Vec::new(), clock: Arc::new(SystemClock) }
    }
}

impl TokenPersistenceBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Toggle the validation gate on load (default on).
    #[must_use]
    pub const fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    #[must_use]
    pub fn on_event(mut self, listener: EventListener) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> TokenPersistence {
        TokenPersistence {
            store: self.store,
            validate: self.validate,
            listeners: self.listeners,
            clock: self.clock,
        }
    }
}
