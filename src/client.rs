//! Catalog API session client
//!
//! [`CatalogClient::login`] performs the single login of a run and hands
//! back a [`Session`]. The session owns the HTTP client whose cookie jar
//! holds the tokens set by the login response, so every product request made
//! through it is authenticated without further bookkeeping.

use crate::config::{ApiConfig, Credentials, RetryConfig};
use crate::error::{Error, FetchError, Result};
use crate::fetcher::ProductApi;
use crate::retry::{IsRetryable, with_retry};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::cookie::Jar;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Unauthenticated catalog client; consumed by [`login`](Self::login)
pub struct CatalogClient {
    http: reqwest::Client,
    api: ApiConfig,
    retry: RetryConfig,
}

/// Every login failure is worth another attempt, including 4xx answers
struct LoginFailure(FetchError);

impl IsRetryable for LoginFailure {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl std::fmt::Display for LoginFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl CatalogClient {
    /// Build a client with a fresh cookie jar and the configured per-call timeout
    pub fn new(api: ApiConfig, retry: RetryConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar)
            .timeout(api.timeout)
            .build()?;

        Ok(Self { http, api, retry })
    }

    /// Log in with form-encoded credentials
    ///
    /// Up to `retry.max_attempts` attempts are made. Any transport error or
    /// non-2xx answer counts as a failed attempt; the last failure is
    /// returned as [`Error::Auth`].
    pub async fn login(self, credentials: &Credentials) -> Result<Session> {
        let url = self.api.login_url()?;
        let mut attempts = 0u32;

        let result = with_retry(&self.retry, || {
            attempts += 1;
            self.login_once(&url, credentials)
        })
        .await;

        match result {
            Ok(cookie_names) => {
                tracing::info!(
                    username = %credentials.username,
                    cookies = cookie_names.len(),
                    "logged in to catalog API"
                );
                Ok(Session {
                    http: self.http,
                    api: Arc::new(self.api),
                    cookie_names: cookie_names.into(),
                })
            }
            Err(LoginFailure(e)) => {
                tracing::error!(
                    username = %credentials.username,
                    error = %e,
                    attempts = attempts,
                    "catalog login failed"
                );
                Err(Error::Auth {
                    attempts,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn login_once(
        &self,
        url: &Url,
        credentials: &Credentials,
    ) -> std::result::Result<Vec<String>, LoginFailure> {
        let form = [
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];
        let response = self
            .http
            .post(url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| LoginFailure(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoginFailure(FetchError::Http {
                status: status.as_u16(),
            }));
        }

        Ok(response.cookies().map(|c| c.name().to_string()).collect())
    }
}

/// Authenticated handle produced by a successful login
///
/// Cloning is cheap and shares the underlying connection pool and cookie
/// jar. The session is never refreshed; once the vendor expires it, product
/// requests fail with [`FetchError::Http`].
#[derive(Clone)]
pub struct Session {
    http: reqwest::Client,
    api: Arc<ApiConfig>,
    cookie_names: Arc<[String]>,
}

impl Session {
    /// Names of the cookies set by the login response
    pub fn cookie_names(&self) -> &[String] {
        &self.cookie_names
    }

    /// Endpoint configuration this session talks to
    pub fn api(&self) -> &ApiConfig {
        &self.api
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.api.base_url)
            .field("cookie_names", &self.cookie_names)
            .finish()
    }
}

#[async_trait]
impl ProductApi for Session {
    async fn get_product_info(&self, article: &str) -> std::result::Result<Value, FetchError> {
        let url = self
            .api
            .product_url(article)
            .map_err(|e| FetchError::Unexpected(e.to_string()))?;

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        Ok(response.json::<Value>().await?)
    }
}
