//! Token lifecycle orchestration
//!
//! [`TokenManager`] composes the PKCE handler, the token endpoint client,
//! the refresh coordinator and persistence:
//!
//! 1. [`TokenManager::get_authorization_url`] starts a PKCE flow
//! 2. [`TokenManager::exchange_code`] redeems the callback code
//! 3. [`TokenManager::ensure_access_token`] serves a usable token, loading
//!    from storage and refreshing when stale
//! 4. [`TokenManager::clear_tokens`] logs out
//!
//! The in-memory copy is authoritative once set; storage is read only while
//! memory is empty. Every replacement of the in-memory copy bumps an epoch so
//! a refresh that started before a logout or a new exchange cannot overwrite
//! the newer state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use brokerlink_common::time::{Clock, SystemClock};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::config::OAuthConfig;
use crate::coordinator::{RefreshCallback, RefreshCoordinator, TokenRefresher};
use crate::error::AuthError;
use crate::exchange::{TokenEndpointClient, TokenGrant};
use crate::persistence::{EventListener, EventMetadata, TokenPersistence};
use crate::pkce::{self, PkcePair};
use crate::store::TokenStore;
use crate::tracer::{LogTracer, RefreshTracer};
use crate::transport::{ReqwestTransport, TokenTransport};
use crate::types::{
    AuthorizationOptions, AuthorizationUrl, RefreshOptions, TokenData, TokenResponse,
};

/// Wait before the background task retries after a failure or while
/// unauthenticated.
pub const AUTO_REFRESH_BACKOFF: Duration = Duration::from_secs(60);

/// OAuth token lifecycle manager.
pub struct TokenManager {
    config: Arc<OAuthConfig>,
    client: Arc<TokenEndpointClient>,
    coordinator: RefreshCoordinator,
    persistence: TokenPersistence,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<TokenData>>,
    pending_pkce: Mutex<Option<PkcePair>>,
    epoch: AtomicU64,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn builder(config: OAuthConfig) -> TokenManagerBuilder {
        TokenManagerBuilder {
            config,
            store: None,
            transport: None,
            refresher: None,
            tracer: None,
            clock: Arc::new(SystemClock),
            listeners: Vec::new(),
            validate: true,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub const fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Build the provider authorization URL for a new PKCE flow.
    ///
    /// The verifier is carried in the returned `state`; the pair is also kept
    /// in memory for callbacks that arrive without one.
    ///
    /// # Errors
    /// Returns `AuthError::Unknown` if the state cannot be encoded.
    pub fn get_authorization_url(
        &self,
        options: AuthorizationOptions,
    ) -> Result<AuthorizationUrl, AuthError> {
        let pair = PkcePair::generate();
        let state = pkce::build_state(options.state.as_ref(), pair.verifier())?;
        let scope = options.scope.or_else(|| self.config.scope.clone());

        let mut params = vec![
            ("response_type", "code".to_string()),
            ("client_id", self.config.client_id.clone()),
            ("redirect_uri", self.config.redirect_uri.clone()),
        ];
        if let Some(scope) = scope.filter(|s| !s.is_empty()) {
            params.push(("scope", scope));
        }
        params.push(("state", state.clone()));
        params.push(("code_challenge", pair.challenge().to_string()));
        params.push(("code_challenge_method", pair.challenge_method().to_string()));

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let auth_url = format!("{}?{query}", self.config.authorize_url());

        *self.pending_pkce.lock() = Some(pair);
        debug!(authorize_url = %self.config.authorize_url(), "Authorization URL generated");

        Ok(AuthorizationUrl { auth_url, generated_state: state })
    }

    /// Exchange an authorization code for tokens.
    ///
    /// The verifier comes from `state`. Only when no state is supplied is the
    /// in-memory pair from the last [`Self::get_authorization_url`] used, and
    /// only if `allow_in_memory_verifier` is set.
    ///
    /// # Errors
    /// - `AuthError::PkceVerifierMissing` when no verifier can be found
    /// - endpoint and network errors from the token request
    /// - `AuthError::PersistenceSaveFailed` when storing fails; the tokens are
    ///   still cached in memory
    pub async fn exchange_code(
        &self,
        code: &str,
        state: Option<&str>,
    ) -> Result<TokenData, AuthError> {
        let verifier = self.resolve_verifier(state.filter(|s| !s.trim().is_empty()))?;

        let tokens = self.client.exchange_authorization_code(code, &verifier).await?;
        {
            let mut current = self.current.write().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *current = Some(tokens.clone());
        }
        self.pending_pkce.lock().take();
        info!(expires_at = tokens.expires_at(), "Authorization code exchanged");

        self.persistence.save(&tokens, EventMetadata::for_operation("exchange")).await?;
        Ok(tokens)
    }

    fn resolve_verifier(&self, state: Option<&str>) -> Result<Zeroizing<String>, AuthError> {
        if let Some(state) = state {
            return pkce::extract_verifier(state).map(Zeroizing::new).ok_or_else(|| {
                AuthError::PkceVerifierMissing(
                    "state parameter does not carry a code verifier".to_string(),
                )
            });
        }

        if !self.config.allow_in_memory_verifier {
            return Err(AuthError::PkceVerifierMissing(
                "no state parameter supplied and in-memory verifier is disabled".to_string(),
            ));
        }
        self.pending_pkce
            .lock()
            .as_ref()
            .map(|pair| Zeroizing::new(pair.verifier().to_string()))
            .ok_or_else(|| {
                AuthError::PkceVerifierMissing(
                    "no state parameter supplied and no pending authorization request".to_string(),
                )
            })
    }

    /// Current tokens from memory, else from storage.
    ///
    /// # Errors
    /// Returns `AuthError::PersistenceLoadFailed` when storage fails. An empty
    /// or invalid store is `Ok(None)`.
    pub async fn get_token_data(&self) -> Result<Option<TokenData>, AuthError> {
        if let Some(tokens) = self.current.read().await.clone() {
            return Ok(Some(tokens));
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let loaded = self.persistence.load().await?.filter(|tokens| !tokens.is_cleared());

        let mut current = self.current.write().await;
        if current.is_some() || self.epoch.load(Ordering::SeqCst) != epoch {
            return Ok(current.clone());
        }
        *current = loaded.clone();
        Ok(loaded)
    }

    /// Access token projection of [`Self::get_token_data`]. No refresh.
    ///
    /// # Errors
    /// See [`Self::get_token_data`].
    pub async fn get_access_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.get_token_data().await?.map(|tokens| tokens.access_token().to_string()))
    }

    /// A usable access token, refreshing first when it is near expiry.
    ///
    /// # Errors
    /// `AuthError::RefreshNeeded` when nothing is stored or no refresh token
    /// exists, otherwise the errors of [`Self::refresh_if_needed`].
    pub async fn ensure_access_token(&self) -> Result<String, AuthError> {
        let tokens = self.refresh_if_needed(RefreshOptions::default()).await?;
        Ok(tokens.access_token().to_string())
    }

    /// Refresh when stale or forced, then cache and persist the result.
    ///
    /// A refresh token in `options` replaces the stored one for this call.
    /// A failed save is logged and reported through the
    /// `TOKEN_SAVE_FAILED` event only.
    ///
    /// # Errors
    /// `AuthError::RefreshNeeded`, `AuthError::RefreshFailed` or a load error.
    pub async fn refresh_if_needed(&self, options: RefreshOptions) -> Result<TokenData, AuthError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut current = self.get_token_data().await?;

        if let Some(refresh_token) = options.refresh_token.filter(|t| !t.is_empty()) {
            current = Some(match current {
                Some(tokens) => tokens.with_refresh_token(refresh_token),
                None => TokenData::new("", Some(refresh_token), 0),
            });
        }

        let refreshed = self.coordinator.refresh_if_needed(current.clone(), options.force).await?;
        if current.as_ref() != Some(&refreshed) {
            self.adopt_refreshed(&refreshed, epoch).await;
        }
        Ok(refreshed)
    }

    async fn adopt_refreshed(&self, tokens: &TokenData, epoch: u64) {
        {
            let mut current = self.current.write().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!("Tokens replaced during refresh, discarding refreshed tokens");
                return;
            }
            if current.as_ref() == Some(tokens) {
                return;
            }
            *current = Some(tokens.clone());
        }

        let metadata = EventMetadata::for_operation("refresh");
        if let Err(e) = self.persistence.save(tokens, metadata).await {
            warn!(error = %e, "Refreshed tokens could not be persisted");
        }
    }

    /// Log out: wipe memory, drop any pending PKCE pair and store the
    /// cleared marker.
    ///
    /// # Errors
    /// Returns `AuthError::PersistenceSaveFailed` when storage fails; memory
    /// is cleared regardless.
    pub async fn clear_tokens(&self) -> Result<(), AuthError> {
        {
            let mut current = self.current.write().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            if let Some(mut tokens) = current.take() {
                tokens.zeroize();
            }
        }
        self.pending_pkce.lock().take();
        info!("Tokens cleared");

        self.persistence.save(&TokenData::cleared(), EventMetadata::for_operation("clear")).await
    }

    /// Register a callback for every successful refresh.
    pub fn on_refresh(&self, callback: RefreshCallback) {
        self.coordinator.on_refresh(callback);
    }

    pub fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing()
    }

    /// Raw token endpoint call, bypassing caching and persistence.
    ///
    /// # Errors
    /// See [`TokenEndpointClient::perform_direct_token_exchange`].
    pub async fn perform_direct_token_exchange(
        &self,
        grant: &TokenGrant,
    ) -> Result<TokenResponse, AuthError> {
        self.client.perform_direct_token_exchange(grant).await
    }

    /// Spawn a task that refreshes shortly before expiry.
    ///
    /// The task sleeps until `expires_at - refresh_threshold`, refreshes, and
    /// waits [`AUTO_REFRESH_BACKOFF`] after a failure or while no tokens
    /// exist. It ends once the manager is dropped; abort the handle to stop
    /// it earlier.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let Some(wait) = Self::auto_refresh_step(&manager).await else {
                    debug!("Token manager dropped, stopping auto refresh");
                    return;
                };
                tokio::time::sleep(wait).await;
            }
        })
    }

    async fn auto_refresh_step(manager: &Weak<Self>) -> Option<Duration> {
        let manager = manager.upgrade()?;
        let threshold = manager.coordinator.threshold_ms();

        let wait = match manager.get_token_data().await {
            Ok(Some(tokens)) => {
                let lead = tokens
                    .millis_until_expiry(manager.clock.millis_since_epoch())
                    .saturating_sub(threshold);
                if lead > 0 {
                    Duration::from_millis(lead.unsigned_abs())
                } else {
                    match manager.refresh_if_needed(RefreshOptions::default()).await {
                        Ok(fresh) if !manager.coordinator.needs_refresh(&fresh) => Duration::ZERO,
                        Ok(_) => AUTO_REFRESH_BACKOFF,
                        Err(e) => {
                            warn!(kind = %e.kind(), error = %e, "Background token refresh failed");
                            AUTO_REFRESH_BACKOFF
                        }
                    }
                }
            }
            Ok(None) => {
                debug!("No tokens for background refresh");
                AUTO_REFRESH_BACKOFF
            }
            Err(e) => {
                warn!(error = %e, "Background refresh could not load tokens");
                AUTO_REFRESH_BACKOFF
            }
        };
        Some(wait)
    }
}

/// Builder for [`TokenManager`].
pub struct TokenManagerBuilder {
    config: OAuthConfig,
    store: Option<Arc<dyn TokenStore>>,
    transport: Option<Arc<dyn TokenTransport>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    tracer: Option<Arc<dyn RefreshTracer>>,
    clock: Arc<dyn Clock>,
    listeners: Vec<EventListener>,
    validate: bool,
}

impl TokenManagerBuilder {
    /// Persist tokens through `store`. Without one, tokens live in memory.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// HTTP transport for the token endpoint (default: `reqwest`).
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn TokenTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override how one refresh attempt is performed (default: a
    /// `refresh_token` grant against the token endpoint).
    #[must_use]
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    #[must_use]
    pub fn tracer(mut self, tracer: Arc<dyn RefreshTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn on_event(mut self, listener: EventListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Toggle shape validation of loaded tokens (default on).
    #[must_use]
    pub const fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// # Errors
    /// Returns `AuthError::Config` for an invalid configuration or when the
    /// default HTTP client cannot be built.
    pub fn build(self) -> Result<TokenManager, AuthError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let transport: Arc<dyn TokenTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let client = Arc::new(
            TokenEndpointClient::new(Arc::clone(&config), transport)
                .with_clock(Arc::clone(&self.clock)),
        );
        let refresher =
            self.refresher.unwrap_or_else(|| Arc::clone(&client) as Arc<dyn TokenRefresher>);
        let tracer = self.tracer.unwrap_or_else(|| Arc::new(LogTracer));

        let coordinator = RefreshCoordinator::builder(refresher)
            .config(config.refresh.clone())
            .tracer(tracer)
            .clock(Arc::clone(&self.clock))
            .build()?;

        let mut persistence =
            TokenPersistence::builder().validate(self.validate).clock(Arc::clone(&self.clock));
        if let Some(store) = self.store {
            persistence = persistence.store(store);
        }
        for listener in self.listeners {
            persistence = persistence.on_event(listener);
        }

        Ok(TokenManager {
            config,
            client,
            coordinator,
            persistence: persistence.build(),
            clock: self.clock,
            current: RwLock::new(None),
            pending_pkce: Mutex::new(None),
            epoch: AtomicU64::new(0),
        })
    }
}
