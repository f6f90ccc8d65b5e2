//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for both the CDR register and a data
//! holder, and run categories end to end through the coordinator.

use cdr_crawler::config::{default_categories, CategoryConfig, Config, FetcherConfig, OutputConfig};
use cdr_crawler::crawler::{Coordinator, CrawlContext, DiscoveryOrchestrator, Fetcher};
use cdr_crawler::output::{JsonSnapshotWriter, MemoryNotifier, Stage};
use cdr_crawler::state::{FixedClock, SummaryEndpoint};
use cdr_crawler::Registry;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIRECTORY_PATH: &str = "/cdr-register/v1/banking/data-holders/brands/summary";
const LISTING_PATH: &str = "/cds-au/v1/banking/products";
const RUN_DATE: &str = "2024-06-01";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Creates a test configuration whose banking category points at `server_uri`
fn create_test_config(server_uri: &str, root: &Path) -> Config {
    let mut category = default_categories().remove(0);
    category.directory_endpoint = format!("{}{}", server_uri, DIRECTORY_PATH);
    category.listing_versions = vec!["3".to_string()];
    category.detail_versions = vec!["4".to_string()];

    Config {
        fetcher: FetcherConfig {
            max_retries: 1,
            max_wait_secs: 0.0,
            request_timeout_secs: 5,
            ..FetcherConfig::default()
        },
        output: OutputConfig {
            snapshot_dir: root.join("historic"),
            registry_dir: root.join("registry"),
            mirror_dir: None,
            responses_database: None,
        },
        categories: vec![category],
        ..Config::default()
    }
}

fn create_context(config: &Config) -> (CrawlContext, Arc<MemoryNotifier>) {
    let fetcher = Fetcher::new(config.fetcher.clone())
        .expect("Failed to build fetcher")
        .with_clock(Arc::new(FixedClock(now())));
    let notifier = Arc::new(MemoryNotifier::new());
    let ctx = CrawlContext::new(
        Arc::new(fetcher),
        config.crawler.clone(),
        Arc::new(JsonSnapshotWriter::new(
            config.output.snapshot_dir.clone(),
            RUN_DATE,
        )),
        notifier.clone(),
    );
    (ctx, notifier)
}

fn registry(config: &Config) -> (CategoryConfig, Registry) {
    let category = config.categories[0].clone();
    let registry = Registry::new(&category, &config.output.registry_dir);
    (category, registry)
}

fn read_json(path: &Path) -> Value {
    let content = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    serde_json::from_str(&content).expect("Snapshot is not JSON")
}

async fn mount_listing(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": [
                {"productId": "A", "productCategory": "MORTGAGES", "brand": "P1"},
                {"productId": "B", "productCategory": "TRANS_AND_SAVINGS_ACCOUNTS"}
            ]},
            "meta": {"totalPages": 1}
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_listing_populates_registry() {
    let server = MockServer::start().await;
    mount_listing(&server).await;

    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server.uri(), temp.path());
    let (ctx, _) = create_context(&config);
    let (category, mut registry) = registry(&config);
    registry.create_summary("P1", SummaryEndpoint::new("P1", server.uri(), now()));

    DiscoveryOrchestrator::new(&ctx, &category)
        .run(&mut registry)
        .await
        .expect("Listing stage failed");

    for item in ["A", "B"] {
        let detail = registry
            .get_detail("P1", item)
            .unwrap_or_else(|| panic!("Item {} missing", item));
        assert_eq!(detail.first_seen, now());
        assert_eq!(detail.last_seen, now());
        assert_eq!(detail.last_success_at, Some(now()));
    }
    assert_eq!(
        registry.get_detail("P1", "A").unwrap().sub_brand.as_deref(),
        Some("P1")
    );

    let snapshot = read_json(
        &config
            .output
            .snapshot_dir
            .join(RUN_DATE)
            .join("get_products_v3_2024-06-01.json"),
    );
    let pages = snapshot["P1"].as_array().expect("P1 pages missing");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0]["statusCode"], 200);
}

#[tokio::test]
async fn test_full_category_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DIRECTORY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "dataHolderBrandId": "P1",
                "brandName": "Provider One",
                "publicBaseUri": server.uri()
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_listing(&server).await;
    for item in ["A", "B"] {
        Mock::given(method("GET"))
            .and(path(format!("{}/{}", LISTING_PATH, item)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"productId": item}})),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server.uri(), temp.path());
    let (ctx, notifier) = create_context(&config);
    let (category, registry) = registry(&config);
    let summary_path = registry.summary_path().to_path_buf();
    let detail_path = registry.detail_path().to_path_buf();

    let coordinator = Coordinator::new(Arc::new(config.clone()), ctx, false);
    let outcome = coordinator.run_category_with(&category, registry).await;

    assert!(outcome.success, "Run failed: {:?}", outcome.error);
    assert_eq!(outcome.stats.requests, 4);
    assert_eq!(outcome.stats.successes, 4);
    assert_eq!(outcome.stats.new_providers, 1);
    assert_eq!(outcome.stats.new_items, 2);

    let stages: Vec<Stage> = notifier.outcomes().iter().map(|o| o.stage).collect();
    assert_eq!(stages, vec![Stage::Directory, Stage::Listing, Stage::Detail]);
    assert!(notifier.outcomes().iter().all(|o| o.success));

    // Persisted registry carries the on-disk key names
    let summaries = read_json(&summary_path);
    assert_eq!(summaries["P1"]["brandName"], "Provider One");
    assert!(summaries["P1"]["last200Response"].is_string());
    let details = read_json(&detail_path);
    assert_eq!(details["P1"]["A"]["productCategory"], "MORTGAGES");

    let mut reloaded = Registry::new(&category, &config.output.registry_dir);
    reloaded.load().expect("Failed to reload registry");
    assert_eq!(reloaded.detail_count(), 2);
    assert_eq!(
        reloaded.get_detail("P1", "B").unwrap().last_success_at,
        Some(now())
    );

    let run_dir = config.output.snapshot_dir.join(RUN_DATE);
    assert!(run_dir.join("dh_brand_summary_banking_2024-06-01.json").exists());
    let details_snapshot = read_json(&run_dir.join("get_product_detail_v4_2024-06-01.json"));
    assert_eq!(details_snapshot["Provider One"]["A"]["statusCode"], 200);
}

#[tokio::test]
async fn test_failed_stage_leaves_registry_unsaved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DIRECTORY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "dataHolderBrandId": "P1",
                "brandName": "Provider One",
                "publicBaseUri": server.uri()
            }]
        })))
        .mount(&server)
        .await;

    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server.uri(), temp.path());
    let (ctx, notifier) = create_context(&config);
    let (category, registry) = registry(&config);
    let summary_path = registry.summary_path().to_path_buf();

    // A file where the run directory should be makes every snapshot write fail
    std::fs::create_dir_all(&config.output.snapshot_dir).unwrap();
    std::fs::write(config.output.snapshot_dir.join(RUN_DATE), "not a directory").unwrap();

    let coordinator = Coordinator::new(Arc::new(config.clone()), ctx, false);
    let outcome = coordinator.run_category_with(&category, registry).await;

    assert!(!outcome.success);
    assert!(outcome.error.is_some());
    assert!(!summary_path.exists());
    assert!(notifier.outcomes().iter().any(|o| !o.success));
}
