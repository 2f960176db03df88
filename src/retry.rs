//! Retry logic with optional exponential backoff
//!
//! Both the login call and every product lookup run through
//! [`with_retry`]. Attempts are strictly sequential; the caller decides
//! which failures are transient by implementing [`IsRetryable`].
//!
//! # Example
//!
//! ```no_run
//! use catalog_prices::retry::{IsRetryable, with_retry};
//! use catalog_prices::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) => true,
            FetchError::Http { .. } => true,
            // 404 will not change on a second ask
            FetchError::NotFound => false,
            // Malformed bodies and unclassified failures surface immediately
            FetchError::Decode(_) | FetchError::Unexpected(_) => false,
            FetchError::BlankArticle => false,
        }
    }
}

/// Execute an async operation, retrying transient failures
///
/// `config.max_attempts` counts every call, the first one included, so the
/// operation runs at most that many times. The last error is returned
/// unchanged once attempts are exhausted or a non-retryable error occurs.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "attempt failed, retrying"
                );

                let wait = if config.jitter { add_jitter(delay) } else { delay };
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }

                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
                    .min(config.max_delay);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::debug!(error = %e, attempts = attempt, "retry attempts exhausted");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
