//! Integration tests for the token lifecycle over HTTP
//!
//! Drives [`TokenManager`] against a `wiremock` token endpoint through the
//! default `reqwest` transport: authorization URL, code exchange, refresh,
//! persistence events and logout.

use std::sync::{Arc, Once};

use brokerlink_auth::{
    pkce, AuthErrorKind, AuthorizationOptions, EventListener, InMemoryTokenStore, OAuthConfig,
    PersistenceEvent, PersistenceEventKind, RefreshConfig, RefreshOptions, TokenManager,
};
use parking_lot::Mutex;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// base64("app-key:app-secret")
const BASIC_CREDENTIALS: &str = "Basic YXBwLWtleTphcHAtc2VjcmV0";

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn config(server: &MockServer) -> OAuthConfig {
    OAuthConfig::new("app-key", "https://127.0.0.1:8182/callback", server.uri())
        .with_client_secret("app-secret")
        .with_scope("readonly")
        .with_refresh(RefreshConfig {
            initial_retry_delay_ms: 10,
            max_retry_delay_ms: 50,
            ..RefreshConfig::default()
        })
}

type Recorded = Arc<Mutex<Vec<PersistenceEvent>>>;

fn recorder() -> (Recorded, EventListener) {
    let events: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let listener: EventListener =
        Arc::new(move |event: &PersistenceEvent| -> Result<(), brokerlink_auth::CallbackError> {
            sink.lock().push(event.clone());
            Ok(())
        });
    (events, listener)
}

/// Validates the full login, refresh and logout flow against a live endpoint.
///
/// # Test Steps
/// 1. Build an authorization URL carrying application state
/// 2. Exchange a percent-encoded code; the endpoint requires Basic
///    credentials and the verifier from the state
/// 3. Force a refresh; the provider does not rotate the refresh token
/// 4. Clear tokens
/// 5. Verify stored contents and the persistence event trail
#[tokio::test(flavor = "multi_thread")]
async fn test_login_refresh_logout_flow() {
    init_tracing();
    let server = MockServer::start().await;
    let store = Arc::new(InMemoryTokenStore::new());
    let (events, listener) = recorder();
    let manager = TokenManager::builder(config(&server))
        .store(store.clone())
        .on_event(listener)
        .build()
        .expect("manager builds");

    // Step 1: authorization URL
    let url = assert_ok!(manager.get_authorization_url(AuthorizationOptions {
        scope: None,
        state: Some(serde_json::json!({"account": "IRA"})),
    }));
    assert!(url.auth_url.starts_with(&format!("{}/oauth/authorize?", server.uri())));
    let verifier = pkce::extract_verifier(&url.generated_state).expect("verifier in state");
    let app_state = pkce::decode_state(&url.generated_state).expect("state decodes");
    assert_eq!(app_state.get("account"), Some(&serde_json::json!("IRA")));

    // Step 2: code exchange
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header("authorization", BASIC_CREDENTIALS))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth%40code"))
        .and(body_string_contains(format!("code_verifier={verifier}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 1800,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let exchanged =
        assert_ok!(manager.exchange_code(" auth%40code ", Some(&url.generated_state)).await);
    assert_eq!(exchanged.access_token(), "at-1");
    assert_eq!(store.snapshot(), Some(exchanged.clone()));

    // Step 3: forced refresh
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header("authorization", BASIC_CREDENTIALS))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refreshed = assert_ok!(manager.refresh_if_needed(RefreshOptions::forced()).await);
    assert_eq!(refreshed.access_token(), "at-2");
    assert_eq!(refreshed.refresh_token(), Some("rt-1"));
    assert_eq!(store.snapshot(), Some(refreshed));

    // Step 4: logout
    assert_ok!(manager.clear_tokens().await);
    assert_eq!(store.snapshot(), None);
    assert_eq!(assert_ok!(manager.get_access_token().await), None);

    // Step 5: event trail
    let trail: Vec<(PersistenceEventKind, Option<String>)> =
        events.lock().iter().map(|e| (e.kind, e.metadata.operation.clone())).collect();
    assert_eq!(
        trail,
        vec![
            (PersistenceEventKind::TokenSaved, Some("exchange".to_string())),
            (PersistenceEventKind::TokenSaved, Some("refresh".to_string())),
            (PersistenceEventKind::TokenSaved, Some("clear".to_string())),
        ]
    );
}

/// Validates that a rejected refresh token is not retried.
///
/// # Test Steps
/// 1. Seed storage with an expired token
/// 2. Endpoint answers 400 `invalid_grant`
/// 3. Verify exactly one request and an `INVALID_CODE` error carrying the
///    status and attempt count
#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_grant_is_not_retried() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let expired = brokerlink_auth::TokenData::new("at", Some("rt".into()), 1);
    let manager = TokenManager::builder(config(&server))
        .store(Arc::new(InMemoryTokenStore::with_tokens(expired)))
        .build()
        .expect("manager builds");

    let err = assert_err!(manager.ensure_access_token().await);
    assert_eq!(err.kind(), AuthErrorKind::InvalidCode);
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.oauth_error(), Some("invalid_grant"));
    assert_eq!(err.attempts(), Some(1));
}

/// Validates retry of transient endpoint failures.
///
/// # Test Steps
/// 1. Endpoint answers 503 twice, then 200
/// 2. Verify the refresh succeeds on the third request
#[tokio::test(flavor = "multi_thread")]
async fn test_transient_failures_are_retried() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "at-3"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let expired = brokerlink_auth::TokenData::new("at", Some("rt".into()), 1);
    let manager = TokenManager::builder(config(&server))
        .store(Arc::new(InMemoryTokenStore::with_tokens(expired)))
        .build()
        .expect("manager builds");

    let access = assert_ok!(manager.ensure_access_token().await);
    assert_eq!(access, "at-3");
}
