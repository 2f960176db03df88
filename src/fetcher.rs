//! Bulk product fetching with a bounded concurrency gate
//!
//! [`BulkFetcher`] launches one lookup per unique article and awaits them
//! together. Each lookup is retried on transient failures; a slot of the
//! fetcher's semaphore is held only while a single attempt is in flight.
//! Failures are captured next to their article in [`ArticleResult`] and
//! never abort the batch.

use crate::config::{FetchConfig, RetryConfig};
use crate::error::FetchError;
use crate::product::PriceRecord;
use crate::retry::with_retry;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Single-attempt product lookup against the catalog
///
/// Implemented by [`Session`](crate::client::Session). Implementations make
/// exactly one request per call; retries and concurrency limiting are the
/// fetcher's job.
#[async_trait]
pub trait ProductApi: Send + Sync {
    /// Fetch the raw JSON body describing one article
    async fn get_product_info(&self, article: &str) -> Result<Value, FetchError>;
}

#[async_trait]
impl<T: ProductApi + ?Sized> ProductApi for Arc<T> {
    async fn get_product_info(&self, article: &str) -> Result<Value, FetchError> {
        (**self).get_product_info(article).await
    }
}

/// Successful lookup result
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Prices already decoded into the internal record
    Record(PriceRecord),
    /// Body exactly as the API returned it, decoded later by the merge step
    Raw(Value),
}

/// Outcome of the lookup for one unique article
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleResult {
    /// Article identifier as submitted
    pub article: String,
    /// Payload on success, the captured failure otherwise
    pub outcome: Result<Payload, FetchError>,
}

/// Anything that can resolve a batch of articles to outcomes
///
/// The merge step depends on this seam rather than on [`BulkFetcher`]
/// directly.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Resolve every unique article in `articles`
    ///
    /// Returns exactly one result per unique identifier, in order of first
    /// appearance. Never fails as a whole.
    async fn get_products(&self, articles: &[String]) -> Vec<ArticleResult>;
}

/// Concurrent, retrying product fetcher
pub struct BulkFetcher<A> {
    api: A,
    gate: Arc<Semaphore>,
    retry: RetryConfig,
    request_delay: Duration,
}

impl<A: ProductApi> BulkFetcher<A> {
    /// Create a fetcher with its own gate of `fetch.max_concurrent` slots
    pub fn new(api: A, fetch: &FetchConfig, retry: RetryConfig) -> Self {
        let gate = Arc::new(Semaphore::new(fetch.max_concurrent.max(1)));
        Self::with_gate(api, gate, fetch, retry)
    }

    /// Create a fetcher that draws slots from an existing gate
    ///
    /// Only fetchers built from the same `Arc<Semaphore>` share a limit.
    pub fn with_gate(
        api: A,
        gate: Arc<Semaphore>,
        fetch: &FetchConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            api,
            gate,
            retry,
            request_delay: fetch.request_delay,
        }
    }

    /// Number of slots currently free in the gate
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    /// Look up one article, retrying transient failures
    ///
    /// A blank article resolves to [`FetchError::BlankArticle`] without any
    /// request being made.
    pub async fn fetch(&self, article: &str) -> Result<Value, FetchError> {
        if article.trim().is_empty() {
            return Err(FetchError::BlankArticle);
        }
        with_retry(&self.retry, || self.attempt(article)).await
    }

    async fn attempt(&self, article: &str) -> Result<Value, FetchError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FetchError::Unexpected("concurrency gate closed".to_string()))?;

        let body = self.api.get_product_info(article).await?;

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
        Ok(body)
    }
}

#[async_trait]
impl<A: ProductApi> PriceSource for BulkFetcher<A> {
    async fn get_products(&self, articles: &[String]) -> Vec<ArticleResult> {
        let started = Instant::now();
        let mut seen = HashSet::new();
        let unique: Vec<&str> = articles
            .iter()
            .map(String::as_str)
            .filter(|a| seen.insert(*a))
            .collect();

        tracing::info!(
            requested = articles.len(),
            unique = unique.len(),
            free_slots = self.gate.available_permits(),
            "fetching product prices"
        );

        let results = join_all(unique.iter().map(|&article| async move {
            let outcome = self.fetch(article).await;
            if let Err(e) = &outcome {
                tracing::warn!(article = %article, error = %e, kind = e.code(), "product lookup failed");
            }
            ArticleResult {
                article: article.to_string(),
                outcome: outcome.map(Payload::Raw),
            }
        }))
        .await;

        let failed = results.iter().filter(|r| r.outcome.is_err()).count();
        tracing::info!(
            unique = results.len(),
            succeeded = results.len() - failed,
            failed = failed,
            elapsed_ms = started.elapsed().as_millis(),
            "product fetch finished"
        );

        results
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedApi;
    use serde_json::json;

    fn fetch_config(max_concurrent: usize) -> FetchConfig {
        FetchConfig {
            max_concurrent,
            request_delay: Duration::ZERO,
        }
    }

    fn articles(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn concurrency_gate_bounds_in_flight_requests() {
        let api = Arc::new(ScriptedApi::ok().with_latency(Duration::from_millis(40)));
        let fetcher = BulkFetcher::new(api.clone(), &fetch_config(2), RetryConfig::default());
        let ids: Vec<String> = (0..10).map(|i| format!("ART-{i}")).collect();

        let results = fetcher.get_products(&ids).await;

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.outcome.is_ok()));
        assert_eq!(api.max_in_flight(), 2, "gate of 2 must cap simultaneous requests");
        assert_eq!(fetcher.available_slots(), 2, "all slots released afterwards");
    }

    #[tokio::test]
    async fn one_failing_article_does_not_affect_others() {
        let api = Arc::new(ScriptedApi::ok().fail("BAD", FetchError::Http { status: 500 }));
        let fetcher = BulkFetcher::new(api.clone(), &fetch_config(4), RetryConfig::default());

        let results = fetcher.get_products(&articles(&["GOOD", "BAD", "ALSO-GOOD"])).await;

        assert_eq!(results[0].article, "GOOD");
        assert!(matches!(results[0].outcome, Ok(Payload::Raw(_))));
        assert_eq!(results[1].outcome, Err(FetchError::Http { status: 500 }));
        assert!(results[2].outcome.is_ok());
        assert_eq!(api.calls("BAD"), 3, "HTTP errors are retried to exhaustion");
        assert_eq!(api.calls("GOOD"), 1);
    }

    #[tokio::test]
    async fn duplicates_are_fetched_once_in_first_appearance_order() {
        let api = Arc::new(ScriptedApi::ok());
        let fetcher = BulkFetcher::new(api.clone(), &fetch_config(4), RetryConfig::default());

        let results = fetcher
            .get_products(&articles(&["B", "A", "B", "C", "A"]))
            .await;

        let order: Vec<_> = results.iter().map(|r| r.article.as_str()).collect();
        assert_eq!(order, ["B", "A", "C"]);
        assert_eq!(api.calls("A"), 1);
        assert_eq!(api.calls("B"), 1);
    }

    #[tokio::test]
    async fn blank_article_never_reaches_the_api() {
        let api = Arc::new(ScriptedApi::ok());
        let fetcher = BulkFetcher::new(api.clone(), &fetch_config(4), RetryConfig::default());

        let results = fetcher.get_products(&articles(&["", "X"])).await;

        assert_eq!(results[0].outcome, Err(FetchError::BlankArticle));
        assert!(results[1].outcome.is_ok());
        assert_eq!(api.total_calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let api = Arc::new(ScriptedApi::ok().flaky("SLOW", 2, FetchError::Timeout));
        let fetcher = BulkFetcher::new(api.clone(), &fetch_config(1), RetryConfig::default());

        let body = fetcher.fetch("SLOW").await.unwrap();

        assert_eq!(body["article"], json!("SLOW"));
        assert_eq!(api.calls("SLOW"), 3);
    }

    #[tokio::test]
    async fn odd_bodies_are_passed_through_untouched() {
        let api = Arc::new(ScriptedApi::ok().body("LIST", json!([1, 2, 3])));
        let fetcher = BulkFetcher::new(api.clone(), &fetch_config(2), RetryConfig::default());

        let results = fetcher.get_products(&articles(&["LIST", "A"])).await;

        assert_eq!(results[0].outcome, Ok(Payload::Raw(json!([1, 2, 3]))));
        assert_eq!(api.calls("LIST"), 1, "a successful response is never retried");
        assert!(matches!(&results[1].outcome, Ok(Payload::Raw(body)) if body["article"] == "A"));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let api = Arc::new(ScriptedApi::ok().fail("GONE", FetchError::NotFound));
        let fetcher = BulkFetcher::new(api.clone(), &fetch_config(1), RetryConfig::default());

        assert_eq!(fetcher.fetch("GONE").await, Err(FetchError::NotFound));
        assert_eq!(api.calls("GONE"), 1);
    }

    #[tokio::test]
    async fn request_delay_holds_the_slot() {
        let api = Arc::new(ScriptedApi::ok());
        let config = FetchConfig {
            max_concurrent: 1,
            request_delay: Duration::from_millis(40),
        };
        let fetcher = BulkFetcher::new(api, &config, RetryConfig::default());

        let started = Instant::now();
        fetcher.get_products(&articles(&["A", "B", "C"])).await;

        assert!(
            started.elapsed() >= Duration::from_millis(120),
            "three serialized delays expected, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn fetchers_share_a_gate_only_when_asked() {
        let api = Arc::new(ScriptedApi::ok());
        let own_a = BulkFetcher::new(api.clone(), &fetch_config(3), RetryConfig::default());
        let own_b = BulkFetcher::new(api.clone(), &fetch_config(3), RetryConfig::default());
        assert!(!Arc::ptr_eq(&own_a.gate, &own_b.gate));

        let gate = Arc::new(Semaphore::new(1));
        let shared_a = BulkFetcher::with_gate(api.clone(), gate.clone(), &fetch_config(3), RetryConfig::default());
        let shared_b = BulkFetcher::with_gate(api, gate.clone(), &fetch_config(3), RetryConfig::default());

        let held = gate.clone().acquire_owned().await.unwrap();
        assert_eq!(shared_a.available_slots(), 0);
        assert_eq!(shared_b.available_slots(), 0);
        drop(held);
        assert_eq!(shared_a.available_slots(), 1);
    }
}
