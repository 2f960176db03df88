//! Shared fakes for unit tests of the fetcher and merge stages.

use crate::error::FetchError;
use crate::fetcher::{ArticleResult, PriceSource, ProductApi};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted [`ProductApi`] that records calls and peak concurrency.
///
/// Articles without a script answer with a full price body.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    bodies: HashMap<String, Value>,
    failures: HashMap<String, (usize, FetchError)>,
    latency: Duration,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedApi {
    pub(crate) fn ok() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Always fail `article` with `err`
    pub(crate) fn fail(self, article: &str, err: FetchError) -> Self {
        self.flaky(article, usize::MAX, err)
    }

    /// Fail the first `times` calls for `article`, then succeed
    pub(crate) fn flaky(mut self, article: &str, times: usize, err: FetchError) -> Self {
        self.failures.insert(article.to_string(), (times, err));
        self
    }

    pub(crate) fn body(mut self, article: &str, body: Value) -> Self {
        self.bodies.insert(article.to_string(), body);
        self
    }

    pub(crate) fn calls(&self, article: &str) -> usize {
        self.calls.lock().unwrap().get(article).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub(crate) fn price_body(article: &str) -> Value {
    json!({
        "article": article,
        "name": format!("product {article}"),
        "priceBase": 100.0,
        "pricePersonal": 80.0,
        "priceRoc": 90.0,
        "priceRrc": 120.0,
    })
}

#[async_trait]
impl ProductApi for ScriptedApi {
    async fn get_product_info(&self, article: &str) -> Result<Value, FetchError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(article.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some((times, err)) = self.failures.get(article)
            && call_index <= *times
        {
            return Err(err.clone());
        }
        Ok(self
            .bodies
            .get(article)
            .cloned()
            .unwrap_or_else(|| price_body(article)))
    }
}

/// [`PriceSource`] returning canned outcomes and counting batch calls.
#[derive(Default)]
pub(crate) struct CannedSource {
    results: Vec<ArticleResult>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl CannedSource {
    pub(crate) fn new(results: Vec<ArticleResult>) -> Self {
        Self {
            results,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.batches.lock().unwrap().concat()
    }
}

#[async_trait]
impl PriceSource for CannedSource {
    async fn get_products(&self, articles: &[String]) -> Vec<ArticleResult> {
        self.batches.lock().unwrap().push(articles.to_vec());
        self.results
            .iter()
            .filter(|r| articles.contains(&r.article))
            .cloned()
            .collect()
    }
}
