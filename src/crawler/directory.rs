//! Directory discovery: the top-level data holder brand listing
//!
//! One fetch of the category's directory endpoint refreshes the registry's
//! summary endpoints. New brands are added, known brands get their name,
//! base URI and `lastSeen` refreshed, and hand-added entries are back-filled.

use crate::config::CategoryConfig;
use crate::crawler::context::CrawlContext;
use crate::crawler::parser::{directory_records, DirectoryRecord};
use crate::crawler::scheduler::{request_label, versioned_headers};
use crate::crawler::FetchResponse;
use crate::output::{directory_snapshot_filename, RunOutcome, RunStatistics, Stage};
use crate::state::SummaryEndpoint;
use crate::storage::Registry;
use std::collections::BTreeMap;
use std::time::Instant;

/// API name used in log lines for directory requests
pub const DIRECTORY_API_NAME: &str = "Get Data Holder Brands Summary";

/// Refreshes summary endpoints from the brand directory
#[derive(Debug)]
pub struct DirectoryOrchestrator<'a> {
    ctx: &'a CrawlContext,
    category: &'a CategoryConfig,
}

impl<'a> DirectoryOrchestrator<'a> {
    pub fn new(ctx: &'a CrawlContext, category: &'a CategoryConfig) -> Self {
        Self { ctx, category }
    }

    /// Fetches the directory and folds it into `registry`
    ///
    /// A failed fetch is reported as a failed stage but does not fail the
    /// run: the listing and detail stages still work from the registry.
    pub async fn run(&self, registry: &mut Registry) -> crate::Result<RunStatistics> {
        tracing::info!("{} ({}) running...", Stage::Directory, self.category.name);
        let start = Instant::now();

        let (result, failure) = match self.crawl(registry).await {
            Ok((stats, failure)) => (Ok(stats), failure),
            Err(e) => (Err(e), None),
        };
        match failure {
            Some(failure) => {
                tracing::error!("Brand directory for {} {}", self.category.name, failure);
                self.ctx.notifier.notify(&RunOutcome::failed(
                    &self.category.name,
                    Stage::Directory,
                    failure,
                ));
            }
            None => self
                .ctx
                .report_stage(&self.category.name, Stage::Directory, &result),
        }

        tracing::info!(
            "...{} ({}) finished ({:.2} seconds)",
            Stage::Directory,
            self.category.name,
            start.elapsed().as_secs_f64()
        );
        result
    }

    /// Returns the stage counters and, when the directory request failed, why
    async fn crawl(
        &self,
        registry: &mut Registry,
    ) -> crate::Result<(RunStatistics, Option<String>)> {
        let mut stats = RunStatistics::default();
        let version = &self.category.directory_version;
        let label = request_label(DIRECTORY_API_NAME, version, "CDR Register");

        tracing::info!("Retrieving data holder brand summary");
        let response = self
            .ctx
            .fetcher
            .fetch(
                &self.category.directory_endpoint,
                &BTreeMap::new(),
                &versioned_headers(version),
                &label,
            )
            .await;
        stats.record_request(response.is_success());

        if response.is_success() {
            self.update_registry(registry, &response, &mut stats);
        }

        let file_name =
            directory_snapshot_filename(&self.category.name, self.ctx.snapshots.run_date());
        self.ctx
            .snapshots
            .write(&file_name, &serde_json::to_value(&response)?)?;

        let failure = (!response.is_success())
            .then(|| format!("request returned {}", response.status_label()));
        Ok((stats, failure))
    }

    fn update_registry(
        &self,
        registry: &mut Registry,
        response: &FetchResponse,
        stats: &mut RunStatistics,
    ) {
        let requested_at = response.requested_at;
        let Some(records) = response.json().and_then(directory_records) else {
            tracing::error!("Brand summary has no data list");
            return;
        };

        for record in records {
            let brand = match record {
                DirectoryRecord::Brand(brand) => brand,
                DirectoryRecord::Incomplete { index } => {
                    tracing::error!(
                        "data[{}] in brand summary missing brandId, brandName or publicBaseUri",
                        index
                    );
                    continue;
                }
            };

            match registry.get_summary_mut(&brand.brand_id) {
                Some(summary) => {
                    tracing::debug!("Updating brandId '{}'", brand.brand_id);
                    summary.observe(brand.brand_name, brand.base_uri, requested_at);
                }
                None => {
                    tracing::info!("New brandId '{}'", brand.brand_id);
                    registry.create_summary(
                        brand.brand_id,
                        SummaryEndpoint::new(brand.brand_name, brand.base_uri, requested_at),
                    );
                    stats.new_providers += 1;
                }
            }
        }

        for (brand_id, summary) in registry.summaries_mut() {
            if summary.backfill(requested_at) {
                tracing::info!("Setting firstSeen and lastSeen for brandId '{}'", brand_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::context::testing::{test_category, test_context};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DIRECTORY_PATH: &str = "/cdr-register/v1/banking/data-holders/brands/summary";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_directory_refreshes_registry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DIRECTORY_PATH))
            .and(header("x-v", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"dataHolderBrandId": "known", "brandName": "Renamed Bank", "publicBaseUri": "https://new.example"},
                    {"interimId": "fresh", "brandName": "Fresh Bank", "publicBaseUri": "https://fresh.example"},
                    {"dataHolderBrandId": "broken", "brandName": "No URI"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let snapshots = TempDir::new().unwrap();
        let registry_dir = TempDir::new().unwrap();
        let (ctx, notifier, _) = test_context(snapshots.path(), now());
        let category = test_category(&server.uri());
        let earlier = now() - Duration::days(30);

        let mut registry = Registry::new(&category, registry_dir.path());
        registry.create_summary("known", SummaryEndpoint::new("Bank", "https://old.example", earlier));
        let mut manual = SummaryEndpoint::new("Manual", "https://manual.example", earlier);
        manual.first_seen = None;
        manual.last_seen = None;
        registry.create_summary("manual", manual);

        let stats = DirectoryOrchestrator::new(&ctx, &category)
            .run(&mut registry)
            .await
            .unwrap();

        assert_eq!(stats.new_providers, 1);
        assert!(registry.get_summary("broken").is_none());

        let known = registry.get_summary("known").unwrap();
        assert_eq!(known.provider_name, "Renamed Bank");
        assert_eq!(known.base_uri, "https://new.example");
        assert_eq!(known.first_seen, Some(earlier));
        assert_eq!(known.last_seen, Some(now()));

        let fresh = registry.get_summary("fresh").unwrap();
        assert_eq!(fresh.first_seen, Some(now()));
        assert_eq!(fresh.last_seen, Some(now()));
        assert!(fresh.last_success_at.is_none());

        let manual = registry.get_summary("manual").unwrap();
        assert_eq!(manual.first_seen, Some(now()));
        assert_eq!(manual.last_seen, Some(now()));

        let path = snapshots
            .path()
            .join("2024-06-01/dh_brand_summary_banking_2024-06-01.json");
        let snapshot: Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(snapshot["statusCode"], 200);
        assert_eq!(snapshot["body"]["data"][1]["interimId"], "fresh");

        assert!(notifier.outcomes()[0].success);
    }

    #[tokio::test]
    async fn test_failed_directory_is_reported_but_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let snapshots = TempDir::new().unwrap();
        let registry_dir = TempDir::new().unwrap();
        let (ctx, notifier, _) = test_context(snapshots.path(), now());
        let category = test_category(&server.uri());
        let mut registry = Registry::new(&category, registry_dir.path());
        registry.create_summary("b1", SummaryEndpoint::new("Bank", "https://b.example", now()));

        let stats = DirectoryOrchestrator::new(&ctx, &category)
            .run(&mut registry)
            .await
            .unwrap();

        assert_eq!(stats.failures, 1);
        assert!(registry.get_summary("b1").is_some());

        let outcomes = notifier.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].stage, Stage::Directory);
    }
}
