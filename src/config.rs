//! Configuration types for catalog-prices
//!
//! Every section deserializes with defaults, so an empty JSON object is a
//! valid configuration pointing at the production catalog.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Main configuration
///
/// Fields are organized into sub-configs:
/// - [`api`](ApiConfig): endpoints and per-request timeout
/// - [`fetch`](FetchConfig): concurrency gate and rate shaping
/// - [`retry`](RetryConfig): attempts and backoff for login and lookups
/// - [`sheet`](SheetConfig): article column and header row
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Catalog API endpoints
    #[serde(default)]
    pub api: ApiConfig,

    /// Bulk fetch behaviour
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry policy shared by login and product lookups
    #[serde(default)]
    pub retry: RetryConfig,

    /// Spreadsheet layout
    #[serde(default)]
    pub sheet: SheetConfig,
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing sections and fields fall back to their defaults. The result is
    /// validated before it is returned.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a run impossible
    pub fn validate(&self) -> Result<()> {
        self.api.login_url()?;
        if self.api.timeout.is_zero() {
            return Err(Error::config("api.timeout", "must be greater than zero"));
        }
        if self.fetch.max_concurrent == 0 {
            return Err(Error::config("fetch.max_concurrent", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }
        if self.sheet.header_row == 0 {
            return Err(Error::config(
                "sheet.header_row",
                "rows are numbered from 1",
            ));
        }
        if self.sheet.article_column.is_empty() {
            return Err(Error::config("sheet.article_column", "must not be empty"));
        }
        Ok(())
    }
}

/// Catalog API endpoint configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Scheme and host of the catalog API (default: "https://bp.iek.ru")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the form-encoded login endpoint (default: "/oauth/login")
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Path prefix of the product-info endpoint; the article is appended as
    /// one more path segment (default: "/api/catalog/v1/client/products")
    #[serde(default = "default_products_path")]
    pub products_path: String,

    /// Timeout for each individual HTTP call (default: 15 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            products_path: default_products_path(),
            timeout: default_timeout(),
        }
    }
}

impl ApiConfig {
    /// Absolute URL of the login endpoint
    pub fn login_url(&self) -> Result<Url> {
        join_url(&self.base_url, &self.login_path, "api.login_path")
    }

    /// Absolute URL of the product-info endpoint for one article
    ///
    /// The article is pushed as a single percent-encoded path segment, so
    /// codes containing `/`, spaces or Cyrillic letters stay one segment.
    pub fn product_url(&self, article: &str) -> Result<Url> {
        let mut url = join_url(&self.base_url, &self.products_path, "api.products_path")?;
        url.path_segments_mut()
            .map_err(|_| Error::config("api.base_url", "URL cannot carry a path"))?
            .pop_if_empty()
            .push(article);
        Ok(url)
    }
}

fn join_url(base: &str, path: &str, key: &str) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| Error::config(key, format!("invalid URL '{joined}': {e}")))
}

/// Bulk fetch configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum simultaneous in-flight product requests (default: 10)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Pause after each successful request before its concurrency slot is
    /// released (default: 0, no rate shaping)
    #[serde(default, with = "duration_serde")]
    pub request_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            request_delay: Duration::ZERO,
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 0)
    #[serde(default, with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: Duration::ZERO,
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Spreadsheet layout configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SheetConfig {
    /// Exact header text of the article column (default: "Article")
    #[serde(default = "default_article_column")]
    pub article_column: String,

    /// 1-based index of the header row (default: 1)
    #[serde(default = "default_header_row")]
    pub header_row: u32,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            article_column: default_article_column(),
            header_row: default_header_row(),
        }
    }
}

/// Catalog login credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
}

/// Environment variable holding the catalog account name
pub const USERNAME_ENV: &str = "IEK_USERNAME";
/// Environment variable holding the catalog account password
pub const PASSWORD_ENV: &str = "IEK_PASSWORD";

impl Credentials {
    /// Build credentials from explicit values
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read credentials from `IEK_USERNAME` / `IEK_PASSWORD`
    ///
    /// A `.env` file in the working directory is loaded first when present;
    /// variables already set in the process environment win.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Err(e) if !e.not_found() => {
                tracing::warn!(error = %e, "could not load .env file");
            }
            _ => {}
        }
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::config(key, format!("environment variable {key} is not set")))
        };
        Ok(Self::new(read(USERNAME_ENV)?, read(PASSWORD_ENV)?))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_base_url() -> String {
    "https://bp.iek.ru".to_string()
}

fn default_login_path() -> String {
    "/oauth/login".to_string()
}

fn default_products_path() -> String {
    "/api/catalog/v1/client/products".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_concurrent() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_article_column() -> String {
    "Article".to_string()
}

fn default_header_row() -> u32 {
    1
}

// Durations are written as whole milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");

        assert_eq!(config.api.base_url, "https://bp.iek.ru");
        assert_eq!(config.api.timeout, Duration::from_secs(15));
        assert_eq!(config.fetch.max_concurrent, 10);
        assert_eq!(config.fetch.request_delay, Duration::ZERO);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::ZERO);
        assert_eq!(config.sheet.article_column, "Article");
        assert_eq!(config.sheet.header_row, 1);
        config.validate().expect("defaults must be valid");
    }

    #[test]
    fn durations_are_read_as_milliseconds() {
        let config: Config = serde_json::from_str(
            r#"{"fetch": {"request_delay": 250}, "api": {"timeout": 1500}}"#,
        )
        .unwrap();

        assert_eq!(config.fetch.request_delay, Duration::from_millis(250));
        assert_eq!(config.api.timeout, Duration::from_millis(1500));
        assert_eq!(config.fetch.max_concurrent, 10, "unset field keeps default");
    }

    #[test]
    fn default_endpoints_match_catalog_layout() {
        let api = ApiConfig::default();
        assert_eq!(
            api.login_url().unwrap().as_str(),
            "https://bp.iek.ru/oauth/login"
        );
        assert_eq!(
            api.product_url("CKK11-012-012-1-K01").unwrap().as_str(),
            "https://bp.iek.ru/api/catalog/v1/client/products/CKK11-012-012-1-K01"
        );
    }

    #[test]
    fn product_url_keeps_article_as_single_segment() {
        let api = ApiConfig {
            base_url: "http://127.0.0.1:9000/".to_string(),
            products_path: "/products/".to_string(),
            ..Default::default()
        };

        let url = api.product_url("A/B 1").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/products/A%2FB%201");
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let config = Config {
            api: ApiConfig {
                base_url: "not a url".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("api.login_path")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut config = Config::default();
        config.fetch.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sheet.header_row = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sheet.article_column.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"sheet": {"article_column": "Артикул", "header_row": 2}}"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sheet.article_column, "Артикул");
        assert_eq!(config.sheet.header_row, 2);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("buyer", "s3cret");
        let printed = format!("{creds:?}");
        assert!(printed.contains("buyer"));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    #[serial]
    fn credentials_from_env_reads_both_variables() {
        // SAFETY: serialized with the other env tests; no other thread reads these keys
        unsafe {
            std::env::set_var(USERNAME_ENV, "buyer");
            std::env::set_var(PASSWORD_ENV, "s3cret");
        }

        let creds = Credentials::from_env().unwrap();
        assert_eq!(creds.username, "buyer");
        assert_eq!(creds.password, "s3cret");

        unsafe {
            std::env::remove_var(USERNAME_ENV);
            std::env::remove_var(PASSWORD_ENV);
        }
    }

    #[test]
    #[serial]
    fn credentials_from_env_requires_password() {
        unsafe {
            std::env::set_var(USERNAME_ENV, "buyer");
            std::env::remove_var(PASSWORD_ENV);
        }

        match Credentials::from_env() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some(PASSWORD_ENV)),
            other => panic!("expected missing password error, got {other:?}"),
        }

        unsafe {
            std::env::remove_var(USERNAME_ENV);
        }
    }
}
