//! # Brokerlink Auth
//!
//! OAuth 2.0 token lifecycle for the brokerage API client: PKCE
//! authorization, code exchange, persisted tokens and single-flight refresh
//! with retry and backoff.
//!
//! ## Modules
//!
//! - [`pkce`]: verifier/challenge generation and the `state` parameter that
//!   carries the verifier across the redirect
//! - [`persistence`]: validated load/save over an injected [`TokenStore`],
//!   with lifecycle events
//! - [`coordinator`]: the single-flight refresh lock, retry policy and
//!   refresh callbacks
//! - [`manager`]: [`TokenManager`], which ties the above together
//! - [`exchange`] / [`transport`]: token endpoint requests
//! - [`tracer`]: injected refresh diagnostics
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use brokerlink_auth::{AuthorizationOptions, InMemoryTokenStore, OAuthConfig, TokenManager};
//!
//! # async fn run() -> Result<(), brokerlink_auth::AuthError> {
//! let config = OAuthConfig::load()?;
//! let manager = Arc::new(
//!     TokenManager::builder(config).store(Arc::new(InMemoryTokenStore::new())).build()?,
//! );
//!
//! let url = manager.get_authorization_url(AuthorizationOptions::default())?;
//! println!("Open {}", url.auth_url);
//!
//! // ... after the redirect:
//! manager.exchange_code("code-from-callback", Some(&url.generated_state)).await?;
//! let _refresher = manager.spawn_auto_refresh();
//! let access_token = manager.ensure_access_token().await?;
//! # let _ = access_token;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod exchange;
pub mod manager;
pub mod persistence;
pub mod pkce;
pub mod store;
pub mod testing;
pub mod tracer;
pub mod transport;
pub mod types;

pub use config::{OAuthConfig, RefreshConfig, UnknownErrorPolicy};
pub use coordinator::{RefreshCallback, RefreshCoordinator, RefreshRetryPolicy, TokenRefresher};
pub use error::{AuthError, AuthErrorKind, RetryClass, StoreError};
pub use exchange::{TokenEndpointClient, TokenGrant};
pub use manager::{TokenManager, TokenManagerBuilder, AUTO_REFRESH_BACKOFF};
pub use persistence::{
    EventListener, EventMetadata, PersistenceEvent, PersistenceEventKind, TokenPersistence,
    ValidationFailure,
};
pub use pkce::{generate_pkce_pair, PkcePair};
#[cfg(feature = "keychain")]
pub use store::KeychainTokenStore;
pub use store::{InMemoryTokenStore, TokenStore};
pub use tracer::{LogTracer, RefreshHistory, RefreshTracer, TraceId};
pub use transport::{
    ReqwestTransport, TokenTransport, TransportError, TransportRequest, TransportResponse,
};
pub use types::{
    AuthorizationOptions, AuthorizationUrl, CallbackError, RefreshOptions, TokenData, TokenResponse,
};
