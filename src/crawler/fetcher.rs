//! Resilient HTTP fetcher
//!
//! This module issues every GET the crawler makes, including:
//! - Building HTTP clients (direct and per-proxy)
//! - Retrying failed attempts with exponential backoff and jitter
//! - Honouring numeric `Retry-After` hints on 429/503
//! - Falling back to proxies when a provider answers 403
//! - Decoding bodies by content type and stripping sensitive headers
//!
//! A fetch never returns an error: when every attempt fails the returned
//! [`FetchResponse`] has no status code and carries the failure kind.

use crate::config::FetcherConfig;
use crate::crawler::response::{
    decode_body, sanitize_headers, FetchFailure, FetchResponse, ResponseBody,
};
use crate::state::{Clock, SystemClock};
use crate::url::with_query;
use rand::seq::IndexedRandom;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Proxy};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Smallest retry budget once proxy fallback is engaged
const MIN_PROXY_BUDGET: u32 = 5;

/// Builds an HTTP client, optionally routed through `proxy`
///
/// # Example
///
/// ```no_run
/// use cdr_crawler::config::FetcherConfig;
/// use cdr_crawler::crawler::build_http_client;
///
/// let client = build_http_client(&FetcherConfig::default(), None).unwrap();
/// ```
pub fn build_http_client(
    config: &FetcherConfig,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

/// Retry budget after a 403 engages proxy fallback
///
/// The first, direct attempt counts against the budget.
pub fn proxy_budget(budget: u32, proxy_count: usize) -> u32 {
    let ceiling = u32::try_from(proxy_count).unwrap_or(u32::MAX).saturating_add(1);
    budget.max(MIN_PROXY_BUDGET).min(ceiling)
}

/// Wait before the attempt following `attempt`
///
/// A server-provided `Retry-After` replaces the computed `2^attempt + U(0,1)`
/// seconds. Either way the wait is capped at `max_wait_secs`.
pub fn backoff_delay(attempt: u32, retry_after: Option<f64>, max_wait_secs: f64) -> Duration {
    let secs = match retry_after {
        Some(hint) if hint.is_finite() && hint >= 0.0 => hint,
        _ => {
            let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
            2f64.powi(exponent) + rand::random::<f64>()
        }
    };
    Duration::try_from_secs_f64(secs.min(max_wait_secs).max(0.0)).unwrap_or(Duration::MAX)
}

/// Parses a numeric `Retry-After` value
pub fn parse_retry_after(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

/// Result of a single attempt
#[derive(Debug, Default)]
struct Attempt {
    status: Option<u16>,
    headers: BTreeMap<String, String>,
    body: Option<ResponseBody>,
    failure: Option<FetchFailure>,
    elapsed: Option<f64>,
    retry_after: Option<f64>,
}

impl Attempt {
    fn failed(failure: FetchFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }
}

/// Retrying HTTP fetcher with proxy fallback
///
/// One instance is shared by every orchestrator of a process; proxies that
/// have succeeded once are preferred for the rest of its lifetime.
#[derive(Debug)]
pub struct Fetcher {
    config: FetcherConfig,
    client: Client,
    proxy_clients: Mutex<HashMap<String, Client>>,
    successful_proxies: Mutex<Vec<String>>,
    sensitive_headers: HashSet<String>,
    clock: Arc<dyn Clock>,
}

impl Fetcher {
    /// Creates a fetcher using the system clock
    pub fn new(config: FetcherConfig) -> Result<Self, reqwest::Error> {
        let client = build_http_client(&config, None)?;
        let sensitive_headers = config
            .sensitive_headers
            .iter()
            .map(|name| name.to_lowercase())
            .collect();

        Ok(Self {
            config,
            client,
            proxy_clients: Mutex::new(HashMap::new()),
            successful_proxies: Mutex::new(Vec::new()),
            sensitive_headers,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock used to stamp `requested_at`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Attempts allowed for `url` before proxy fallback
    ///
    /// The longest matching `host-retry-overrides` prefix wins.
    pub fn retry_budget(&self, url: &str) -> u32 {
        self.config
            .host_retry_overrides
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, budget)| *budget)
            .unwrap_or(self.config.max_retries)
    }

    /// Proxies that have returned HTTP 200, in the order they first did
    pub fn successful_proxies(&self) -> Vec<String> {
        self.successful_proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Issues one logical GET with retries
    ///
    /// `label` prefixes every log line (API name, version, brand).
    pub async fn fetch(
        &self,
        url: &str,
        params: &BTreeMap<String, String>,
        headers: &BTreeMap<String, String>,
        label: &str,
    ) -> FetchResponse {
        let request_url = with_query(url, params);
        let mut budget = self.retry_budget(url);
        let mut proxy_mode = false;
        let mut candidates: Vec<String> = Vec::new();

        let mut attempt = 0;
        let mut requested_at = self.clock.now();
        let mut outcome = Attempt::default();

        while attempt < budget && (!proxy_mode || !candidates.is_empty()) {
            attempt += 1;

            let proxy = if proxy_mode {
                self.choose_proxy(&candidates)
            } else {
                None
            };

            let mut log_info = format!("{}{} | Attempt {}", label, request_url, attempt);
            if let Some(proxy) = &proxy {
                log_info.push_str(&format!(" (with proxy: {})", proxy));
            }

            requested_at = self.clock.now();
            outcome = match self.client_for(proxy.as_deref()) {
                Ok(client) => self.attempt(&client, &request_url, headers, &log_info).await,
                Err(e) => {
                    tracing::warn!("{}: Failed to build proxy client: {}", log_info, e);
                    Attempt::failed(FetchFailure::Proxy)
                }
            };

            if outcome.status == Some(200) {
                tracing::debug!(
                    "{}: Request succeeded in {:.2}s",
                    log_info,
                    outcome.elapsed.unwrap_or_default()
                );
                if let Some(proxy) = proxy {
                    self.remember_proxy(proxy);
                }
                break;
            }

            match outcome.status {
                Some(status) => tracing::warn!("{}: Request failed with status {}", log_info, status),
                None => tracing::warn!(
                    "{}: [{}] Failed to make request",
                    log_info,
                    outcome.failure.map(|f| f.to_string()).unwrap_or_default()
                ),
            }

            if let Some(proxy) = &proxy {
                candidates.retain(|candidate| candidate != proxy);
            } else if outcome.status == Some(403) && !proxy_mode && !self.config.proxies.is_empty()
            {
                tracing::warn!(
                    "{}: Potentially blocked by provider, trying again with proxies",
                    log_info
                );
                proxy_mode = true;
                candidates = self.config.proxies.clone();
                budget = proxy_budget(budget, candidates.len());
            }

            let will_retry = attempt < budget && (!proxy_mode || !candidates.is_empty());
            if !will_retry {
                tracing::error!("{}: Giving up after {} attempts", log_info, attempt);
                break;
            }

            let wait = backoff_delay(attempt, outcome.retry_after, self.config.max_wait_secs);
            tracing::debug!("{}: Retrying in {:.2}s", log_info, wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }

        FetchResponse {
            url: request_url,
            request_params: params.clone(),
            request_headers: headers.clone(),
            requested_at,
            response_time: outcome.elapsed,
            response_headers: sanitize_headers(outcome.headers, &self.sensitive_headers),
            status_code: outcome.status,
            failure: outcome.failure,
            body: outcome.body,
        }
    }

    /// Sends one attempt under the per-attempt timeout (body included)
    async fn attempt(
        &self,
        client: &Client,
        url: &str,
        headers: &BTreeMap<String, String>,
        log_info: &str,
    ) -> Attempt {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let start = Instant::now();

        let mut request = client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let result = tokio::time::timeout(timeout, async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, headers, bytes))
        })
        .await;

        let (status, headers, bytes) = match result {
            Err(_) => return Attempt::failed(FetchFailure::Timeout),
            Ok(Err(e)) => return Attempt::failed(FetchFailure::from(&e)),
            Ok(Ok(parts)) => parts,
        };

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let (body, failure) = decode_body(&content_type, &bytes);
        match failure {
            Some(_) => tracing::warn!(
                "{}: Failed to decode body based on Content-Type '{}'",
                log_info,
                content_type
            ),
            None if matches!(body, ResponseBody::Text(_)) => tracing::warn!(
                "{}: Unexpected Content-Type '{}'",
                log_info,
                content_type
            ),
            None => {}
        }

        let retry_after = if matches!(status, 429 | 503) {
            headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|raw| {
                    let parsed = parse_retry_after(raw);
                    if parsed.is_none() {
                        tracing::warn!("{}: Invalid Retry-After value '{}'", log_info, raw);
                    }
                    parsed
                })
        } else {
            None
        };

        Attempt {
            status: Some(status),
            headers: header_map(&headers),
            body: Some(body),
            failure,
            elapsed: Some(start.elapsed().as_secs_f64()),
            retry_after,
        }
    }

    /// Prefers a proxy that has succeeded before, else a random candidate
    fn choose_proxy(&self, candidates: &[String]) -> Option<String> {
        let preferred = self
            .successful_proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|proxy| candidates.contains(proxy))
            .cloned();

        preferred.or_else(|| candidates.choose(&mut rand::rng()).cloned())
    }

    fn remember_proxy(&self, proxy: String) {
        let mut successful = self
            .successful_proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !successful.contains(&proxy) {
            successful.push(proxy);
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
        let Some(proxy) = proxy else {
            return Ok(self.client.clone());
        };

        let mut clients = self
            .proxy_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.config, Some(proxy))?;
        clients.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

/// Flattens a header map, joining repeated headers with ", "
fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FixedClock;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> FetcherConfig {
        FetcherConfig {
            max_retries: 3,
            max_wait_secs: 0.0,
            request_timeout_secs: 5,
            ..FetcherConfig::default()
        }
    }

    fn no_params() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&test_config(), None).is_ok());
        assert!(build_http_client(&test_config(), Some("http://10.0.0.1:3128")).is_ok());
    }

    #[test]
    fn test_proxy_budget() {
        assert_eq!(proxy_budget(3, 10), 5);
        assert_eq!(proxy_budget(8, 10), 8);
        assert_eq!(proxy_budget(8, 2), 3);
        assert_eq!(proxy_budget(3, 1), 2);
    }

    #[test]
    fn test_retry_after_replaces_backoff() {
        assert_eq!(
            backoff_delay(4, Some(3.5), 60.0),
            Duration::from_secs_f64(3.5)
        );
    }

    #[test]
    fn test_backoff_is_exponential_with_jitter_and_capped() {
        for attempt in 1..=4 {
            let wait = backoff_delay(attempt, None, 60.0).as_secs_f64();
            let base = 2f64.powi(attempt as i32);
            assert!(wait >= base && wait < base + 1.0, "attempt {}: {}", attempt, wait);
        }
        assert_eq!(backoff_delay(10, None, 60.0), Duration::from_secs(60));
        assert_eq!(backoff_delay(1, Some(120.0), 60.0), Duration::from_secs(60));
    }

    #[test]
    fn test_huge_retry_after_does_not_overflow() {
        assert_eq!(backoff_delay(1, Some(1e300), f64::MAX), Duration::MAX);
        assert_eq!(backoff_delay(1, Some(1e300), 86_400.0), Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("3.5"), Some(3.5));
        assert_eq!(parse_retry_after(" 10 "), Some(10.0));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("inf"), None);
    }

    #[test]
    fn test_retry_budget_override() {
        let mut config = test_config();
        config
            .host_retry_overrides
            .insert("https://slow.example/".to_string(), 10);
        config
            .host_retry_overrides
            .insert("https://slow.example/api/".to_string(), 7);
        let fetcher = Fetcher::new(config).unwrap();

        assert_eq!(fetcher.retry_budget("https://fast.example/products"), 3);
        assert_eq!(fetcher.retry_budget("https://slow.example/products"), 10);
        assert_eq!(fetcher.retry_budget("https://slow.example/api/products"), 7);
    }

    #[tokio::test]
    async fn test_success_returns_json_and_strips_sensitive_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"data": {"products": []}}"#, "application/json")
                    .insert_header("set-cookie", "session=secret")
                    .insert_header("x-fapi-interaction-id", "abc"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let requested_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let fetcher = Fetcher::new(test_config())
            .unwrap()
            .with_clock(Arc::new(FixedClock(requested_at)));
        let params = BTreeMap::from([("page".to_string(), "1".to_string())]);
        let headers = BTreeMap::from([("x-v".to_string(), "3".to_string())]);

        let response = fetcher
            .fetch(&format!("{}/products", server.uri()), &params, &headers, "")
            .await;

        assert!(response.is_success());
        assert_eq!(response.url, format!("{}/products?page=1", server.uri()));
        assert_eq!(response.requested_at, requested_at);
        assert_eq!(response.json().unwrap()["data"]["products"], serde_json::json!([]));
        assert!(response.failure.is_none());
        assert!(response.response_time.is_some());
        assert!(!response.response_headers.contains_key("set-cookie"));
        assert_eq!(
            response.response_headers.get("x-fapi-interaction-id").map(String::as_str),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_on_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let response = fetcher
            .fetch(&server.uri(), &no_params(), &no_params(), "")
            .await;

        assert_eq!(response.status_code, Some(500));
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_retry_after_hint_is_honoured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0.2"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(&server)
            .await;

        let config = FetcherConfig {
            max_wait_secs: 60.0,
            ..test_config()
        };
        let fetcher = Fetcher::new(config).unwrap();

        let start = Instant::now();
        let response = fetcher
            .fetch(&server.uri(), &no_params(), &no_params(), "")
            .await;
        let elapsed = start.elapsed();

        assert!(response.is_success());
        // The computed backoff for attempt 1 would be at least 2 seconds
        assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_forbidden_switches_to_proxy() {
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&target)
            .await;

        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(&proxy)
            .await;

        let config = FetcherConfig {
            proxies: vec![proxy.uri()],
            ..test_config()
        };
        let fetcher = Fetcher::new(config).unwrap();
        let response = fetcher
            .fetch(&format!("{}/products", target.uri()), &no_params(), &no_params(), "")
            .await;

        assert!(response.is_success());
        assert_eq!(target.received_requests().await.unwrap().len(), 1);
        assert_eq!(proxy.received_requests().await.unwrap().len(), 1);
        assert_eq!(fetcher.successful_proxies(), vec![proxy.uri()]);
    }

    #[tokio::test]
    async fn test_successful_proxy_is_preferred_on_later_calls() {
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&target)
            .await;

        let working = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(&working)
            .await;
        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&broken)
            .await;

        let config = FetcherConfig {
            proxies: vec![broken.uri(), working.uri()],
            ..test_config()
        };
        let fetcher = Fetcher::new(config).unwrap();
        let url = format!("{}/products", target.uri());

        // Whichever proxy is drawn first, the call ends on the working one
        let first = fetcher.fetch(&url, &no_params(), &no_params(), "").await;
        assert!(first.is_success());
        assert_eq!(fetcher.successful_proxies(), vec![working.uri()]);
        let broken_before = broken.received_requests().await.unwrap().len();
        assert_eq!(working.received_requests().await.unwrap().len(), 1);

        let second = fetcher.fetch(&url, &no_params(), &no_params(), "").await;
        assert!(second.is_success());
        assert_eq!(working.received_requests().await.unwrap().len(), 2);
        assert_eq!(broken.received_requests().await.unwrap().len(), broken_before);
    }

    #[tokio::test]
    async fn test_failing_proxies_are_tried_once_each() {
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&target)
            .await;

        let mut proxies = Vec::new();
        let mut servers = Vec::new();
        for _ in 0..2 {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(502))
                .mount(&server)
                .await;
            proxies.push(server.uri());
            servers.push(server);
        }

        let config = FetcherConfig {
            proxies,
            ..test_config()
        };
        let fetcher = Fetcher::new(config).unwrap();
        let response = fetcher
            .fetch(&target.uri(), &no_params(), &no_params(), "")
            .await;

        // Budget becomes min(max(5, 3), 1 + 2) = 3: one direct attempt, one per proxy
        assert_eq!(response.status_code, Some(502));
        assert_eq!(target.received_requests().await.unwrap().len(), 1);
        for server in &servers {
            assert_eq!(server.received_requests().await.unwrap().len(), 1);
        }
        assert!(fetcher.successful_proxies().is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_without_proxies_keeps_retrying_direct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let response = fetcher
            .fetch(&server.uri(), &no_params(), &no_params(), "")
            .await;

        assert_eq!(response.status_code, Some(403));
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_status_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "application/json"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let response = fetcher
            .fetch(&server.uri(), &no_params(), &no_params(), "")
            .await;

        assert_eq!(response.status_code, Some(200));
        assert_eq!(response.failure, Some(FetchFailure::Decode));
        assert_eq!(
            response.body,
            Some(ResponseBody::Text("<html></html>".to_string()))
        );
    }

    #[tokio::test]
    async fn test_connection_failure_has_no_status() {
        let fetcher = Fetcher::new(FetcherConfig {
            max_retries: 2,
            ..test_config()
        })
        .unwrap();

        let response = fetcher
            .fetch("http://127.0.0.1:1/products", &no_params(), &no_params(), "")
            .await;

        assert!(response.status_code.is_none());
        assert_eq!(response.failure, Some(FetchFailure::Connect));
        assert!(response.body.is_none());
        assert!(response.response_time.is_none());
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(FetcherConfig {
            max_retries: 1,
            request_timeout_secs: 1,
            ..test_config()
        })
        .unwrap();

        let response = fetcher
            .fetch(&server.uri(), &no_params(), &no_params(), "")
            .await;

        assert!(response.status_code.is_none());
        assert_eq!(response.failure, Some(FetchFailure::Timeout));
    }
}
