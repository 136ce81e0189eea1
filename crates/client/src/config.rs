//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All optional:
//! - `AUTOPRO_API_URL` - Backend base URL (default: `https://api.autopro.ru/v1`)
//! - `AUTOPRO_CACHE_TTL_SECS` - Default response cache TTL (default: 300)
//! - `AUTOPRO_CACHE_CAPACITY` - Maximum cached responses (default: 1000)
//! - `AUTOPRO_MAX_RETRIES` - Mutation retry budget (default: 3)
//! - `AUTOPRO_RETRY_DELAY_MS` - Mutation backoff base (default: 1000)
//! - `AUTOPRO_AUDIT_CAPACITY` - In-memory audit entries kept (default: 100)
//! - `AUTOPRO_AUDIT_FORWARD` - Forward audit entries to the backend (default: true)
//! - `AUTOPRO_PREFETCH_DELAY_MS` - Prefetch debounce (default: 300)
//! - `AUTOPRO_CLIENT_IP` - Address recorded on audit entries (default: 127.0.0.1)

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Default backend base URL.
pub const DEFAULT_API_URL: &str = "https://api.autopro.ru/v1";
/// Address recorded on audit entries when none is configured.
pub const DEFAULT_CLIENT_IP: &str = "127.0.0.1";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Data-access layer configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every relative request path is appended to
    pub api_url: Url,
    /// TTL used when a caller does not pick one
    pub cache_ttl: Duration,
    /// Maximum number of cached responses
    pub cache_capacity: u64,
    /// Default retry budget for optimistic mutations
    pub max_retries: u32,
    /// Backoff base; attempt `n` waits `retry_delay * 2^n`
    pub retry_delay: Duration,
    /// Size of the in-memory audit ring
    pub audit_capacity: usize,
    /// Whether audit entries are forwarded to the backend
    pub audit_forward: bool,
    /// Debounce before scheduled prefetches fire
    pub prefetch_delay: Duration,
    /// Address recorded on audit entries
    pub client_ip: Option<String>,
}

impl ClientConfig {
    /// Create a configuration with defaults for everything except the base URL.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1000,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            audit_capacity: 100,
            audit_forward: true,
            prefetch_delay: Duration::from_millis(300),
            client_ip: Some(DEFAULT_CLIENT_IP.to_string()),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value is present but cannot be parsed.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("AUTOPRO_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(&api_url)?;

        let defaults = Self::new(api_url);

        Ok(Self {
            cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "AUTOPRO_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            cache_capacity: parse_or(&lookup, "AUTOPRO_CACHE_CAPACITY", defaults.cache_capacity)?,
            max_retries: parse_or(&lookup, "AUTOPRO_MAX_RETRIES", defaults.max_retries)?,
            retry_delay: Duration::from_millis(parse_or(
                &lookup,
                "AUTOPRO_RETRY_DELAY_MS",
                1000,
            )?),
            audit_capacity: parse_or(&lookup, "AUTOPRO_AUDIT_CAPACITY", defaults.audit_capacity)?,
            audit_forward: parse_or(&lookup, "AUTOPRO_AUDIT_FORWARD", defaults.audit_forward)?,
            prefetch_delay: Duration::from_millis(parse_or(
                &lookup,
                "AUTOPRO_PREFETCH_DELAY_MS",
                300,
            )?),
            client_ip: Some(
                lookup("AUTOPRO_CLIENT_IP").unwrap_or_else(|| DEFAULT_CLIENT_IP.to_string()),
            ),
            ..defaults
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse a variable if present, otherwise use the default.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map_or(Ok(default), |value| {
        value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_source(source(&[])).expect("config");
        assert_eq!(config.api_url.as_str(), "https://api.autopro.ru/v1");
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
        assert_eq!(config.audit_capacity, 100);
        assert!(config.audit_forward);
        assert_eq!(config.client_ip.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_new_records_loopback_ip() {
        let config = ClientConfig::new(Url::parse("http://localhost:8080").expect("url"));
        assert_eq!(config.client_ip.as_deref(), Some(DEFAULT_CLIENT_IP));
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_source(source(&[
            ("AUTOPRO_API_URL", "http://localhost:8080/v2"),
            ("AUTOPRO_MAX_RETRIES", "5"),
            ("AUTOPRO_RETRY_DELAY_MS", "250"),
            ("AUTOPRO_AUDIT_FORWARD", "false"),
        ]))
        .expect("config");

        assert_eq!(config.api_url.as_str(), "http://localhost:8080/v2");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert!(!config.audit_forward);
    }

    #[test]
    fn test_invalid_number() {
        let err = ClientConfig::from_source(source(&[("AUTOPRO_CACHE_CAPACITY", "lots")]))
            .expect_err("should fail");
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "AUTOPRO_CACHE_CAPACITY"));
    }

    #[test]
    fn test_invalid_url() {
        let err = ClientConfig::from_source(source(&[("AUTOPRO_API_URL", "not a url")]))
            .expect_err("should fail");
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }
}
