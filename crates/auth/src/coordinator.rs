//! Single-flight token refresh
//!
//! [`RefreshCoordinator`] guarantees at most one refresh in flight per
//! coordinator. Concurrent callers that arrive while a refresh runs await the
//! same shared result instead of issuing their own request.
//!
//! ```text
//!            refresh_if_needed
//!                   │
//!        ┌── slot occupied? ──yes──► await shared future
//!        │no
//!        ▼
//!   stale or forced? ──no──► return current
//!        │yes
//!        ▼
//!   spawn task: retry loop ──► tracer + callbacks
//!        │                        │
//!   install slot           drop guard clears slot
//! ```
//!
//! The refresh itself runs on a spawned task so a caller that stops awaiting
//! cannot cancel it half-way. The task owns a drop guard that frees the slot
//! on every exit path, including panics.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use brokerlink_common::resilience::{RetryDecision, RetryError, RetryExecutor, RetryPolicy};
use brokerlink_common::time::{Clock, SystemClock};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{RefreshConfig, UnknownErrorPolicy};
use crate::error::{AuthError, RetryClass};
use crate::tracer::{LogTracer, RefreshTracer};
use crate::types::{CallbackError, TokenData};

/// Performs one refresh attempt.
///
/// Implementations issue a single request; retries belong to the
/// coordinator.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, current: &TokenData) -> Result<TokenData, AuthError>;
}

/// Callback invoked with every successfully refreshed [`TokenData`].
pub type RefreshCallback = Arc<dyn Fn(&TokenData) -> Result<(), CallbackError> + Send + Sync>;

type SharedRefresh = Shared<BoxFuture<'static, Result<TokenData, AuthError>>>;

/// Retry policy for refresh attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshRetryPolicy {
    pub unknown: UnknownErrorPolicy,
}

impl RetryPolicy<AuthError> for RefreshRetryPolicy {
    fn should_retry(&self, error: &AuthError, attempt: u32) -> RetryDecision {
        match error.retry_class() {
            RetryClass::Retryable => RetryDecision::Retry,
            RetryClass::NonRetryable => RetryDecision::Stop,
            RetryClass::Unclassified => {
                debug!(
                    attempt,
                    policy = ?self.unknown,
                    error = %error,
                    "Unclassified refresh error"
                );
                match self.unknown {
                    UnknownErrorPolicy::Retry => RetryDecision::Retry,
                    UnknownErrorPolicy::Fail => RetryDecision::Stop,
                }
            }
        }
    }
}

struct InFlight {
    generation: u64,
    future: SharedRefresh,
}

struct Inner {
    config: RefreshConfig,
    refresher: Arc<dyn TokenRefresher>,
    tracer: Arc<dyn RefreshTracer>,
    clock: Arc<dyn Clock>,
    executor: RetryExecutor<RefreshRetryPolicy>,
    callbacks: RwLock<Vec<RefreshCallback>>,
    slot: Mutex<Option<InFlight>>,
    generations: AtomicU64,
}

impl Inner {
    async fn run_refresh(&self, current: TokenData) -> Result<TokenData, AuthError> {
        let trace_id = observe("start_refresh_trace", || self.tracer.start_refresh_trace())
            .unwrap_or_default();
        debug!(trace_id = %trace_id, expires_at = current.expires_at(), "Refreshing access token");

        let refresher = &self.refresher;
        let current = &current;
        let outcome = self.executor.execute_with_outcome(|| refresher.refresh(current)).await;

        match outcome.result {
            Ok(tokens) => {
                observe("record_refresh_success", || {
                    self.tracer.record_refresh_success(&trace_id, &tokens);
                });
                info!(
                    trace_id = %trace_id,
                    attempts = outcome.attempts,
                    expires_at = tokens.expires_at(),
                    "Access token refreshed"
                );
                self.notify(&tokens);
                Ok(tokens)
            }
            Err(retry_error) => {
                let err = match retry_error {
                    RetryError::AttemptsExhausted { attempts, error }
                    | RetryError::NonRetryable { attempts, error } => {
                        AuthError::RefreshFailed { attempts, source: Box::new(error) }
                    }
                    RetryError::InvalidConfiguration { message } => AuthError::Config(message),
                };
                observe("record_refresh_failure", || {
                    self.tracer.record_refresh_failure(&trace_id, &err);
                });
                error!(
                    trace_id = %trace_id,
                    attempts = outcome.attempts,
                    kind = %err.kind(),
                    error = %err,
                    "Access token refresh failed"
                );
                Err(err)
            }
        }
    }

    fn notify(&self, tokens: &TokenData) {
        let callbacks = self.callbacks.read().clone();
        let failures: Vec<String> = callbacks
            .iter()
            .filter_map(|callback| match catch_unwind(AssertUnwindSafe(|| callback(tokens))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(format!("callback panicked: {}", panic_message(&*payload))),
            })
            .collect();

        if !failures.is_empty() {
            warn!(
                failed_callbacks = failures.len(),
                total_callbacks = callbacks.len(),
                errors = ?failures,
                "Refresh callbacks failed"
            );
        }
    }
}

/// Run a tracer hook, containing any panic.
fn observe<R>(hook: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            warn!(hook, panic = panic_message(&*payload), "Refresh tracer panicked");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Frees the in-flight slot when the refresh task ends.
struct SlotRelease {
    inner: Arc<Inner>,
    generation: u64,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut slot = self.inner.slot.lock();
        if slot.as_ref().is_some_and(|in_flight| in_flight.generation == self.generation) {
            *slot = None;
        }
    }
}

/// Owns the refresh lock, retry policy and success callbacks.
///
/// Cloning shares the same lock.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("config", &self.inner.config)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    pub fn builder(refresher: Arc<dyn TokenRefresher>) -> RefreshCoordinatorBuilder {
        RefreshCoordinatorBuilder {
            refresher,
            config: RefreshConfig::default(),
            tracer: Arc::new(LogTracer),
            clock: Arc::new(SystemClock),
        }
    }

    /// Return a fresh token, refreshing when needed.
    ///
    /// - a refresh already in flight is joined, whatever `current` is
    /// - `current == None` is `RefreshNeeded`
    /// - not stale and not forced returns `current` unchanged
    /// - stale without a refresh token is `RefreshNeeded` (never retried)
    ///
    /// # Errors
    /// `AuthError::RefreshNeeded` as above, `AuthError::RefreshFailed` when
    /// the retry loop gives up.
    pub async fn refresh_if_needed(
        &self,
        current: Option<TokenData>,
        force: bool,
    ) -> Result<TokenData, AuthError> {
        let future = {
            let mut slot = self.inner.slot.lock();
            if let Some(in_flight) = slot.as_ref() {
                debug!(generation = in_flight.generation, "Joining in-flight token refresh");
                in_flight.future.clone()
            } else {
                let Some(current) = current else {
                    return Err(AuthError::RefreshNeeded("no tokens available".to_string()));
                };
                if !force && !self.needs_refresh(&current) {
                    return Ok(current);
                }
                if !current.has_refresh_token() {
                    return Err(AuthError::RefreshNeeded(
                        "no refresh token available".to_string(),
                    ));
                }

                let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
                let inner = Arc::clone(&self.inner);
                let handle = tokio::spawn(async move {
                    let _release = SlotRelease { inner: Arc::clone(&inner), generation };
                    inner.run_refresh(current).await
                });
                let future = async move {
                    handle.await.unwrap_or_else(|join_error| {
                        Err(AuthError::Unknown(format!("token refresh task aborted: {join_error}")))
                    })
                }
                .boxed()
                .shared();

                *slot = Some(InFlight { generation, future: future.clone() });
                future
            }
        };

        future.await
    }

    /// True when `tokens` expire within the refresh threshold.
    pub fn needs_refresh(&self, tokens: &TokenData) -> bool {
        let now = self.inner.clock.millis_since_epoch();
        tokens.expires_within(now, self.inner.config.refresh_threshold_ms)
    }

    pub fn threshold_ms(&self) -> i64 {
        self.inner.config.refresh_threshold_ms
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    /// True while a refresh holds the lock.
    pub fn is_refreshing(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    /// Register a callback for every successful refresh.
    ///
    /// Callback errors are logged and never fail the refresh.
    pub fn on_refresh(&self, callback: RefreshCallback) {
        self.inner.callbacks.write().push(callback);
    }
}

/// Builder for [`RefreshCoordinator`].
pub struct RefreshCoordinatorBuilder {
    refresher: Arc<dyn TokenRefresher>,
    config: RefreshConfig,
    tracer: Arc<dyn RefreshTracer>,
    clock: Arc<dyn Clock>,
}

impl RefreshCoordinatorBuilder {
    #[must_use]
    pub fn config(mut self, config: RefreshConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn tracer(mut self, tracer: Arc<dyn RefreshTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// # Errors
    /// Returns `AuthError::Config` if the refresh settings are invalid.
    pub fn build(self) -> Result<RefreshCoordinator, AuthError> {
        self.config.validate()?;
        let policy = RefreshRetryPolicy { unknown: self.config.unknown_error_policy };
        let executor = RetryExecutor::new(self.config.retry_config(), policy);

        Ok(RefreshCoordinator {
            inner: Arc::new(Inner {
                config: self.config,
                refresher: self.refresher,
                tracer: self.tracer,
                clock: self.clock,
                executor,
                callbacks: RwLock::new(Vec::new()),
                slot: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        })
    }
}
