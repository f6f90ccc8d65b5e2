//! Concurrency gate for fan-out fetches
//!
//! Every orchestrator owns one [`RequestLimiter`]. All of its fetches, across
//! brands and pages, pass through the same counting semaphore, so no more than
//! `max_concurrent_requests` are in flight at once. Admission is FIFO.

use crate::crawler::{FetchResponse, Fetcher};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Everything needed to issue one logical GET
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// Log prefix: `<api name> v<version> | <brand name> | `
    pub label: String,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, headers: BTreeMap<String, String>, label: String) -> Self {
        Self {
            url: url.into(),
            params: BTreeMap::new(),
            headers,
            label,
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

/// Builds the log prefix shared by every attempt of a request
pub fn request_label(api_name: &str, version: &str, brand_name: &str) -> String {
    format!("{} v{} | {} | ", api_name, version, brand_name)
}

/// Standard headers for a versioned CDR API call
pub fn versioned_headers(version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Accept".to_string(), "application/json".to_string()),
        ("x-v".to_string(), version.to_string()),
    ])
}

/// Counting limiter over in-flight fetches
#[derive(Debug, Clone)]
pub struct RequestLimiter {
    semaphore: Arc<Semaphore>,
}

impl RequestLimiter {
    /// Creates a limiter admitting `max_in_flight` operations (at least one)
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Runs `operation` once a permit is available
    ///
    /// The permit is held until the operation completes.
    pub async fn run<F: Future>(&self, operation: F) -> F::Output {
        // The semaphore is never closed, so a permit always arrives
        let _permit = self.semaphore.acquire().await.ok();
        operation.await
    }

    /// Issues `request` through `fetcher` under the limit
    pub async fn fetch(&self, fetcher: &Fetcher, request: &FetchRequest) -> FetchResponse {
        self.run(fetcher.fetch(
            &request.url,
            &request.params,
            &request.headers,
            &request.label,
        ))
        .await
    }
}
