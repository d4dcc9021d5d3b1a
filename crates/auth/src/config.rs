//! OAuth client and refresh configuration
//!
//! ## Loading Strategy
//! 1. `.env` in the working directory is applied (if present) via `dotenvy`
//! 2. Environment variables are read
//! 3. If required variables are missing, `brokerlink.toml` or
//!    `brokerlink.json` in the working directory is used
//!
//! ## Environment Variables
//! - `BROKERLINK_CLIENT_ID` (required)
//! - `BROKERLINK_CLIENT_SECRET`
//! - `BROKERLINK_REDIRECT_URI` (required)
//! - `BROKERLINK_ISSUER_URL` (required)
//! - `BROKERLINK_SCOPE`
//! - `BROKERLINK_ALLOW_IN_MEMORY_VERIFIER` (true/false, default true)
//! - `BROKERLINK_REFRESH_THRESHOLD_MS` (default 300000)
//! - `BROKERLINK_MAX_RETRY_ATTEMPTS` (default 3)
//! - `BROKERLINK_INITIAL_RETRY_DELAY_MS` (default 1000)
//! - `BROKERLINK_MAX_RETRY_DELAY_MS` (default 30000)
//! - `BROKERLINK_EXPONENTIAL_BACKOFF` (true/false, default true)
//! - `BROKERLINK_UNKNOWN_ERROR_POLICY` (`retry` or `fail`, default `retry`)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use brokerlink_common::resilience::{BackoffStrategy, RetryConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;

type Result<T> = std::result::Result<T, AuthError>;

/// What the refresh loop does with an error no rule classifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownErrorPolicy {
    /// Treat it as transient and retry.
    #[default]
    Retry,
    /// Give up immediately.
    Fail,
}

impl FromStr for UnknownErrorPolicy {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "fail" | "stop" => Ok(Self::Fail),
            other => Err(AuthError::Config(format!("Invalid unknown error policy: {other}"))),
        }
    }
}

/// Refresh coordinator tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Refresh when the token expires within this many milliseconds.
    pub refresh_threshold_ms: i64,
    /// Attempts per refresh, including the first.
    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Exponential (`initial * 2^n`) when true, linear (`initial * (n + 1)`)
    /// otherwise.
    pub use_exponential_backoff: bool,
    pub unknown_error_policy: UnknownErrorPolicy,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_ms: 300_000,
            max_retry_attempts: 3,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            use_exponential_backoff: true,
            unknown_error_policy: UnknownErrorPolicy::Retry,
        }
    }
}

impl RefreshConfig {
    /// Retry executor settings derived from this configuration.
    pub fn retry_config(&self) -> RetryConfig {
        let initial_delay = Duration::from_millis(self.initial_retry_delay_ms);
        let max_delay = Duration::from_millis(self.max_retry_delay_ms);
        let backoff = if self.use_exponential_backoff {
            BackoffStrategy::Exponential { initial_delay, base: 2.0, max_delay }
        } else {
            BackoffStrategy::Linear { initial_delay, increment: initial_delay, max_delay }
        };
        RetryConfig { max_attempts: self.max_retry_attempts, backoff }
    }

    /// # Errors
    /// Returns `AuthError::Config` for a zero attempt count, a negative
    /// threshold or a max delay below the initial delay.
    pub fn validate(&self) -> Result<()> {
        if self.max_retry_attempts == 0 {
            return Err(AuthError::Config("max_retry_attempts must be greater than 0".into()));
        }
        if self.refresh_threshold_ms < 0 {
            return Err(AuthError::Config("refresh_threshold_ms must not be negative".into()));
        }
        if self.max_retry_delay_ms < self.initial_retry_delay_ms {
            return Err(AuthError::Config(
                "max_retry_delay_ms must be at least initial_retry_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Provider and client registration settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    /// Base URL; the endpoints are `{issuer}/oauth/authorize` and
    /// `{issuer}/oauth/token`.
    pub issuer_base_url: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// Allow `exchange_code` without a state parameter by using the verifier
    /// of the last authorization URL built in this process.
    #[serde(default = "default_true")]
    pub allow_in_memory_verifier: bool,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

const fn default_true() -> bool {
    true
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("issuer_base_url", &self.issuer_base_url)
            .field("scope", &self.scope)
            .field("allow_in_memory_verifier", &self.allow_in_memory_verifier)
            .field("refresh", &self.refresh)
            .finish()
    }
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        issuer_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            issuer_base_url: issuer_base_url.into(),
            scope: None,
            allow_in_memory_verifier: true,
            refresh: RefreshConfig::default(),
        }
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn with_refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }

    #[must_use]
    pub const fn with_in_memory_verifier(mut self, allow: bool) -> Self {
        self.allow_in_memory_verifier = allow;
        self
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/oauth/authorize", self.issuer_base_url.trim_end_matches('/'))
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.issuer_base_url.trim_end_matches('/'))
    }

    /// # Errors
    /// Returns `AuthError::Config` when a required field is empty, a URL is
    /// malformed or the refresh settings are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Config("client_id must not be empty".into()));
        }
        Url::parse(&self.redirect_uri)
            .map_err(|e| AuthError::Config(format!("Invalid redirect_uri: {e}")))?;
        let issuer = Url::parse(&self.issuer_base_url)
            .map_err(|e| AuthError::Config(format!("Invalid issuer_base_url: {e}")))?;
        if !matches!(issuer.scheme(), "http" | "https") {
            return Err(AuthError::Config(format!(
                "issuer_base_url must use http or https, got {}",
                issuer.scheme()
            )));
        }
        self.refresh.validate()
    }

    /// Load configuration with automatic fallback strategy
    ///
    /// # Errors
    /// Returns `AuthError::Config` if neither the environment nor a config
    /// file yields a valid configuration.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }

        match Self::from_env() {
            Ok(config) => {
                tracing::info!("OAuth configuration loaded from environment variables");
                Ok(config)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to load from environment, trying file");
                let path = probe_config_paths().ok_or_else(|| {
                    AuthError::Config(
                        "No brokerlink.toml or brokerlink.json found in the working directory"
                            .to_string(),
                    )
                })?;
                Self::from_file(&path)
            }
        }
    }

    /// Load configuration from `BROKERLINK_*` environment variables
    ///
    /// # Errors
    /// Returns `AuthError::Config` if required variables are missing or any
    /// value fails to parse.
    pub fn from_env() -> Result<Self> {
        let defaults = RefreshConfig::default();
        let refresh = RefreshConfig {
            refresh_threshold_ms: env_parse(
                "BROKERLINK_REFRESH_THRESHOLD_MS",
                defaults.refresh_threshold_ms,
            )?,
            max_retry_attempts: env_parse(
                "BROKERLINK_MAX_RETRY_ATTEMPTS",
                defaults.max_retry_attempts,
            )?,
            initial_retry_delay_ms: env_parse(
                "BROKERLINK_INITIAL_RETRY_DELAY_MS",
                defaults.initial_retry_delay_ms,
            )?,
            max_retry_delay_ms: env_parse(
                "BROKERLINK_MAX_RETRY_DELAY_MS",
                defaults.max_retry_delay_ms,
            )?,
            use_exponential_backoff: env_bool(
                "BROKERLINK_EXPONENTIAL_BACKOFF",
                defaults.use_exponential_backoff,
            ),
            unknown_error_policy: env_parse(
                "BROKERLINK_UNKNOWN_ERROR_POLICY",
                defaults.unknown_error_policy,
            )?,
        };

        let config = Self {
            client_id: env_var("BROKERLINK_CLIENT_ID")?,
            client_secret: std::env::var("BROKERLINK_CLIENT_SECRET").ok(),
            redirect_uri: env_var("BROKERLINK_REDIRECT_URI")?,
            issuer_base_url: env_var("BROKERLINK_ISSUER_URL")?,
            scope: std::env::var("BROKERLINK_SCOPE").ok(),
            allow_in_memory_verifier: env_bool("BROKERLINK_ALLOW_IN_MEMORY_VERIFIER", true),
            refresh,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML or JSON file (by extension)
    ///
    /// # Errors
    /// Returns `AuthError::Config` if the file is missing, unreadable, in an
    /// unsupported format, or invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AuthError::Config(format!("Config file not found: {}", path.display())));
        }

        tracing::info!(path = %path.display(), "Loading OAuth configuration from file");

        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("Failed to read config file: {e}")))?;
        let config = parse_config(&contents, path)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_config(contents: &str, path: &Path) -> Result<OAuthConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| AuthError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| AuthError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(AuthError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First of `brokerlink.toml` / `brokerlink.json` in the working directory.
pub fn probe_config_paths() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    [cwd.join("brokerlink.toml"), cwd.join("brokerlink.json")]
        .into_iter()
        .find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| AuthError::Config(format!("Missing required environment variable: {key}")))
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AuthError::Config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;
    use tempfile::Builder;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const ENV_KEYS: [&str; 12] = [
        "BROKERLINK_CLIENT_ID",
        "BROKERLINK_CLIENT_SECRET",
        "BROKERLINK_REDIRECT_URI",
        "BROKERLINK_ISSUER_URL",
        "BROKERLINK_SCOPE",
        "BROKERLINK_ALLOW_IN_MEMORY_VERIFIER",
        "BROKERLINK_REFRESH_THRESHOLD_MS",
        "BROKERLINK_MAX_RETRY_ATTEMPTS",
        "BROKERLINK_INITIAL_RETRY_DELAY_MS",
        "BROKERLINK_MAX_RETRY_DELAY_MS",
        "BROKERLINK_EXPONENTIAL_BACKOFF",
        "BROKERLINK_UNKNOWN_ERROR_POLICY",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    fn sample() -> OAuthConfig {
        OAuthConfig::new("client", "https://127.0.0.1:8182/callback", "https://api.example.com/v1")
    }

    #[test]
    fn test_endpoint_urls() {
        let config = OAuthConfig::new("c", "https://localhost/cb", "https://api.example.com/v1/");
        assert_eq!(config.authorize_url(), "https://api.example.com/v1/oauth/authorize");
        assert_eq!(config.token_url(), "https://api.example.com/v1/oauth/token");
    }

    #[test]
    fn test_refresh_defaults() {
        let refresh = RefreshConfig::default();
        assert_eq!(refresh.refresh_threshold_ms, 300_000);
        assert_eq!(refresh.max_retry_attempts, 3);
        assert_eq!(refresh.initial_retry_delay_ms, 1_000);
        assert_eq!(refresh.max_retry_delay_ms, 30_000);
        assert!(refresh.use_exponential_backoff);
        assert_eq!(refresh.unknown_error_policy, UnknownErrorPolicy::Retry);
    }

    /// Validates the backoff mapping onto the retry executor.
    ///
    /// Assertions:
    /// - Exponential: delay before attempt n is `min(1000 * 2^n, 30000)`.
    /// - Linear: delay before attempt n is `min(1000 * (n + 1), 30000)`.
    #[test]
    fn test_retry_config_mapping() {
        let exponential = RefreshConfig::default().retry_config();
        assert_eq!(exponential.max_attempts, 3);
        assert_eq!(exponential.backoff.calculate_delay(1), Duration::from_millis(2_000));
        assert_eq!(exponential.backoff.calculate_delay(2), Duration::from_millis(4_000));
        assert_eq!(exponential.backoff.calculate_delay(9), Duration::from_millis(30_000));

        let linear = RefreshConfig { use_exponential_backoff: false, ..RefreshConfig::default() }
            .retry_config();
        assert_eq!(linear.backoff.calculate_delay(1), Duration::from_millis(2_000));
        assert_eq!(linear.backoff.calculate_delay(2), Duration::from_millis(3_000));
        assert_eq!(linear.backoff.calculate_delay(100), Duration::from_millis(30_000));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(sample().validate().is_ok());

        let mut config = sample();
        config.client_id = "  ".into();
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));

        let config = OAuthConfig::new("c", "not a url", "https://api.example.com");
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));

        let config = OAuthConfig::new("c", "https://localhost/cb", "ftp://api.example.com");
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));

        let config = sample()
            .with_refresh(RefreshConfig { max_retry_attempts: 0, ..RefreshConfig::default() });
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_debug_redacts_client_secret() {
        let config = sample().with_client_secret("hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_unknown_error_policy_parsing() {
        assert_eq!("retry".parse::<UnknownErrorPolicy>().ok(), Some(UnknownErrorPolicy::Retry));
        assert_eq!("FAIL".parse::<UnknownErrorPolicy>().ok(), Some(UnknownErrorPolicy::Fail));
        assert!("sometimes".parse::<UnknownErrorPolicy>().is_err());
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        std::env::set_var("BROKERLINK_TEST_BOOL_YES", "yes");
        std::env::set_var("BROKERLINK_TEST_BOOL_OFF", "OFF");
        std::env::remove_var("BROKERLINK_TEST_BOOL_MISSING");

        assert!(env_bool("BROKERLINK_TEST_BOOL_YES", false));
        assert!(!env_bool("BROKERLINK_TEST_BOOL_OFF", true));
        assert!(env_bool("BROKERLINK_TEST_BOOL_MISSING", true));

        std::env::remove_var("BROKERLINK_TEST_BOOL_YES");
        std::env::remove_var("BROKERLINK_TEST_BOOL_OFF");
    }

    #[test]
    fn test_from_env_all_vars_set() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("BROKERLINK_CLIENT_ID", "app-key");
        std::env::set_var("BROKERLINK_CLIENT_SECRET", "app-secret");
        std::env::set_var("BROKERLINK_REDIRECT_URI", "https://127.0.0.1:8182");
        std::env::set_var("BROKERLINK_ISSUER_URL", "https://api.example.com/v1");
        std::env::set_var("BROKERLINK_SCOPE", "readonly");
        std::env::set_var("BROKERLINK_ALLOW_IN_MEMORY_VERIFIER", "false");
        std::env::set_var("BROKERLINK_REFRESH_THRESHOLD_MS", "60000");
        std::env::set_var("BROKERLINK_MAX_RETRY_ATTEMPTS", "5");
        std::env::set_var("BROKERLINK_EXPONENTIAL_BACKOFF", "no");
        std::env::set_var("BROKERLINK_UNKNOWN_ERROR_POLICY", "fail");

        let result = OAuthConfig::from_env();
        clear_env();

        let config = result.expect("config loads from env");
        assert_eq!(config.client_id, "app-key");
        assert_eq!(config.client_secret.as_deref(), Some("app-secret"));
        assert_eq!(config.scope.as_deref(), Some("readonly"));
        assert!(!config.allow_in_memory_verifier);
        assert_eq!(config.refresh.refresh_threshold_ms, 60_000);
        assert_eq!(config.refresh.max_retry_attempts, 5);
        assert_eq!(config.refresh.initial_retry_delay_ms, 1_000);
        assert!(!config.refresh.use_exponential_backoff);
        assert_eq!(config.refresh.unknown_error_policy, UnknownErrorPolicy::Fail);
    }

    #[test]
    fn test_from_env_missing_and_invalid() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        assert!(matches!(OAuthConfig::from_env(), Err(AuthError::Config(_))));

        std::env::set_var("BROKERLINK_CLIENT_ID", "app-key");
        std::env::set_var("BROKERLINK_REDIRECT_URI", "https://127.0.0.1:8182");
        std::env::set_var("BROKERLINK_ISSUER_URL", "https://api.example.com/v1");
        std::env::set_var("BROKERLINK_MAX_RETRY_ATTEMPTS", "many");

        let result = OAuthConfig::from_env();
        clear_env();

        match result {
            Err(AuthError::Config(message)) => {
                assert!(message.contains("BROKERLINK_MAX_RETRY_ATTEMPTS"), "{message}");
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = Builder::new().suffix(".toml").tempfile().expect("temp file");
        writeln!(
            file,
            r#"
client_id = "app-key"
redirect_uri = "https://127.0.0.1:8182/callback"
issuer_base_url = "https://api.example.com/v1"
scope = "readonly"

[refresh]
max_retry_attempts = 4
unknown_error_policy = "fail"
"#
        )
        .expect("write config");

        let config = OAuthConfig::from_file(file.path()).expect("toml config loads");
        assert_eq!(config.client_id, "app-key");
        assert!(config.allow_in_memory_verifier);
        assert_eq!(config.refresh.max_retry_attempts, 4);
        assert_eq!(config.refresh.refresh_threshold_ms, 300_000);
        assert_eq!(config.refresh.unknown_error_policy, UnknownErrorPolicy::Fail);
    }

    #[test]
    fn test_from_file_json_and_errors() {
        let mut file = Builder::new().suffix(".json").tempfile().expect("temp file");
        let json = serde_json::json!({
            "client_id": "c",
            "client_secret": "s",
            "redirect_uri": "https://localhost/cb",
            "issuer_base_url": "http://127.0.0.1:9000",
            "allow_in_memory_verifier": false
        });
        write!(file, "{json}").expect("write config");

        let config = OAuthConfig::from_file(file.path()).expect("json config loads");
        assert_eq!(config.client_secret.as_deref(), Some("s"));
        assert!(!config.allow_in_memory_verifier);

        let missing = OAuthConfig::from_file(Path::new("/nonexistent/brokerlink.toml"));
        assert!(matches!(missing, Err(AuthError::Config(_))));

        let mut yaml = Builder::new().suffix(".yaml").tempfile().expect("temp file");
        writeln!(yaml, "client_id: c").expect("write config");
        assert!(matches!(OAuthConfig::from_file(yaml.path()), Err(AuthError::Config(_))));
    }
}
