//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SALON_API_BASE_URL` - Base URL of the booking backend (e.g. `https://api.salon.example/v1/`)
//!
//! ## Optional
//! - `SALON_DATA_DIR` - Directory holding the durable session store (default: `.salon`)
//! - `SALON_REQUEST_TIMEOUT_SECS` - Per-request network timeout (default: 12)
//! - `SALON_CONTEXT_STALE_SECS` - Age after which the selected shop is stale (default: 300)
//! - `SALON_CONTEXT_EXPIRE_SECS` - Age after which the selected shop is discarded (default: 600)
//! - `SALON_LOGOUT_QUIET_MS` - Window in which duplicate logouts are collapsed (default: 1000)
//! - `SALON_VALIDATE_ON_RESTORE` - Call `/auth/me` when restoring a stored session (default: true)
//! - `SALON_CONTEXT_REQUIRED_CODE` - Error code meaning "no shop selected" (default: `shop_not_selected`)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_DATA_DIR: &str = ".salon";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 12;
const DEFAULT_CONTEXT_STALE_SECS: u64 = 300;
const DEFAULT_CONTEXT_EXPIRE_SECS: u64 = 600;
const DEFAULT_LOGOUT_QUIET_MS: u64 = 1000;
const DEFAULT_CONTEXT_REQUIRED_CODE: &str = "shop_not_selected";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Salon client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, always ending in `/` so relative paths join under it
    pub base_url: Url,
    /// Directory of the durable session store
    pub data_dir: PathBuf,
    /// Upper bound on every network call
    pub request_timeout: Duration,
    /// Selected-shop cache thresholds
    pub context: ContextCacheConfig,
    /// Quiet period of the logout re-entrancy guard
    pub logout_quiet_period: Duration,
    /// Whether `restore()` validates the stored token against `/auth/me`
    pub validate_on_restore: bool,
    /// Structured error code the backend uses for "no active shop selected"
    pub context_required_code: String,
}

/// Freshness thresholds for the selected-shop cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCacheConfig {
    /// Age after which a cached value is stale (still usable with `allow_stale`)
    pub stale_after: Duration,
    /// Age after which a cached value is discarded before any decision
    pub expire_after: Duration,
}

impl Default for ContextCacheConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(DEFAULT_CONTEXT_STALE_SECS),
            expire_after: Duration::from_secs(DEFAULT_CONTEXT_EXPIRE_SECS),
        }
    }
}

impl ContextCacheConfig {
    /// Check that `expire_after` is strictly greater than `stale_after`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` naming the expiry variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expire_after <= self.stale_after {
            return Err(ConfigError::InvalidEnvVar(
                "SALON_CONTEXT_EXPIRE_SECS".to_string(),
                format!(
                    "must be greater than the stale threshold ({}s)",
                    self.stale_after.as_secs()
                ),
            ));
        }
        Ok(())
    }
}

impl ClientConfig {
    /// Build a configuration with default settings for the given backend.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            context: ContextCacheConfig::default(),
            logout_quiet_period: Duration::from_millis(DEFAULT_LOGOUT_QUIET_MS),
            validate_on_restore: true,
            context_required_code: DEFAULT_CONTEXT_REQUIRED_CODE.to_string(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_url = get("SALON_API_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("SALON_API_BASE_URL".to_string()))?;
        let base_url = Url::parse(&raw_url).map_err(|e| {
            ConfigError::InvalidEnvVar("SALON_API_BASE_URL".to_string(), e.to_string())
        })?;

        let mut config = Self::new(base_url);

        if let Some(dir) = get("SALON_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.request_timeout = Duration::from_secs(parse_u64(
            &get,
            "SALON_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        config.context = ContextCacheConfig {
            stale_after: Duration::from_secs(parse_u64(
                &get,
                "SALON_CONTEXT_STALE_SECS",
                DEFAULT_CONTEXT_STALE_SECS,
            )?),
            expire_after: Duration::from_secs(parse_u64(
                &get,
                "SALON_CONTEXT_EXPIRE_SECS",
                DEFAULT_CONTEXT_EXPIRE_SECS,
            )?),
        };
        config.context.validate()?;
        config.logout_quiet_period = Duration::from_millis(parse_u64(
            &get,
            "SALON_LOGOUT_QUIET_MS",
            DEFAULT_LOGOUT_QUIET_MS,
        )?);
        config.validate_on_restore = parse_bool(&get, "SALON_VALIDATE_ON_RESTORE", true)?;
        if let Some(code) = get("SALON_CONTEXT_REQUIRED_CODE") {
            config.context_required_code = code;
        }

        if config.request_timeout.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "SALON_REQUEST_TIMEOUT_SECS".to_string(),
                "must be at least 1 second".to_string(),
            ));
        }

        Ok(config)
    }

    /// Path of the durable store file inside `data_dir`.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Make sure the base URL ends with `/` so `join("auth/login")` keeps its path.
fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn parse_u64(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    get(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1" | "true" | "yes") => Ok(true),
        Some("0" | "false" | "no") => Ok(false),
        Some(other) => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("expected true/false, got '{other}'"),
        )),
    }
}
