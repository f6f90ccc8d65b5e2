//! Listing discovery
//!
//! For every listing API version, page 1 of every non-skipped brand's listing
//! endpoint is fetched concurrently; each successful page 1 then fans out the
//! remaining pages under the same limiter. Every page updates the brand's
//! health and, on success, folds its items into the registry.
//!
//! Versions run one after another so a brand pruned while crawling one
//! version is not requested again for the next.

use crate::config::CategoryConfig;
use crate::crawler::context::CrawlContext;
use crate::crawler::parser::{is_empty_listing, listing_items, total_pages};
use crate::crawler::scheduler::{request_label, versioned_headers, FetchRequest, RequestLimiter};
use crate::crawler::FetchResponse;
use crate::output::{snapshot_filename, ApiResponseRecord, RunStatistics, Stage};
use crate::storage::{DetailUpsert, Registry};
use crate::url::endpoint_url;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::time::Instant;

/// A brand's listing endpoint, resolved for this run
#[derive(Debug, Clone)]
struct ListingTarget {
    brand_id: String,
    brand_name: String,
    url: String,
}

/// Pages of one version, by brand name
type ListingSnapshot = BTreeMap<String, Vec<(u32, FetchResponse)>>;

/// Walks every known listing endpoint
#[derive(Debug)]
pub struct DiscoveryOrchestrator<'a> {
    ctx: &'a CrawlContext,
    category: &'a CategoryConfig,
}

impl<'a> DiscoveryOrchestrator<'a> {
    pub fn new(ctx: &'a CrawlContext, category: &'a CategoryConfig) -> Self {
        Self { ctx, category }
    }

    /// Crawls every listing version and writes one snapshot per version
    ///
    /// Individual fetch failures never fail the stage; only an unexpected
    /// error (such as an unwritable snapshot) does.
    pub async fn run(&self, registry: &mut Registry) -> crate::Result<RunStatistics> {
        tracing::info!("{} ({}) running...", Stage::Listing, self.category.name);
        let start = Instant::now();

        let result = self.crawl(registry).await;
        self.ctx
            .report_stage(&self.category.name, Stage::Listing, &result);

        tracing::info!(
            "...{} ({}) finished ({:.2} seconds)",
            Stage::Listing,
            self.category.name,
            start.elapsed().as_secs_f64()
        );
        result
    }

    async fn crawl(&self, registry: &mut Registry) -> crate::Result<RunStatistics> {
        let limiter = self.ctx.limiter();
        let mut stats = RunStatistics::default();
        let mut records = Vec::new();

        for version in &self.category.listing_versions {
            let targets = self.targets(registry);
            let headers = versioned_headers(version);
            let mut pages = ListingSnapshot::new();

            tracing::info!(
                "Fetching {} v{} for {} brands",
                self.category.listing_api_name,
                version,
                targets.len()
            );

            let mut in_flight = FuturesUnordered::new();
            for target in &targets {
                in_flight.push(self.fetch_page(&limiter, target, 1, version, &headers));
            }

            while let Some((target, page, response)) = in_flight.next().await {
                stats.record_request(response.is_success());
                self.update_summary(registry, target, &response, &mut stats);

                if response.is_success() {
                    self.update_details(registry, target, &response, &mut stats);

                    if page == 1 {
                        for next in 2..=self.page_count(target, version, &response) {
                            in_flight.push(self.fetch_page(&limiter, target, next, version, &headers));
                        }
                    }
                }

                if self.ctx.records_responses(self.category) {
                    records.push(self.record(target, version, &response));
                }
                pages
                    .entry(target.brand_name.clone())
                    .or_default()
                    .push((page, response));
            }

            self.write_snapshot(version, pages)?;
        }

        self.ctx.submit_records(&records);
        Ok(stats)
    }

    /// Resolves listing URLs of every non-skipped brand
    fn targets(&self, registry: &Registry) -> Vec<ListingTarget> {
        tracing::info!("Retrieving endpoints from registry");
        let mut targets = Vec::new();

        for (brand_id, summary) in registry.summaries() {
            if summary.skip {
                tracing::info!("Skipping brandId '{}'", brand_id);
                continue;
            }

            match endpoint_url(summary.effective_base_uri(), &self.category.listing_path) {
                Ok(url) => targets.push(ListingTarget {
                    brand_id: brand_id.clone(),
                    brand_name: summary.effective_name().to_string(),
                    url: url.to_string(),
                }),
                Err(e) => tracing::warn!("Skipping brandId '{}': {}", brand_id, e),
            }
        }

        targets
    }

    async fn fetch_page<'t>(
        &self,
        limiter: &RequestLimiter,
        target: &'t ListingTarget,
        page: u32,
        version: &str,
        headers: &BTreeMap<String, String>,
    ) -> (&'t ListingTarget, u32, FetchResponse) {
        let params = BTreeMap::from([
            ("effective".to_string(), "ALL".to_string()),
            ("page".to_string(), page.to_string()),
            (
                "page-size".to_string(),
                self.ctx.settings.page_size.to_string(),
            ),
        ]);
        let label = request_label(&self.category.listing_api_name, version, &target.brand_name);
        let request = FetchRequest::new(target.url.clone(), headers.clone(), label).with_params(params);

        let response = limiter.fetch(&self.ctx.fetcher, &request).await;
        (target, page, response)
    }

    /// Declared page count of a successful page 1, capped at `max-pages`
    fn page_count(&self, target: &ListingTarget, version: &str, response: &FetchResponse) -> u32 {
        let label = request_label(&self.category.listing_api_name, version, &target.brand_name);
        let declared = match response.json().and_then(total_pages) {
            Some(pages) => pages.max(1),
            None => {
                tracing::error!("{}{} | Failed to extract totalPages", label, response.url);
                1
            }
        };

        let max_pages = self.ctx.settings.max_pages;
        if declared > max_pages {
            tracing::warn!(
                "{}{} | Declared {} pages, fetching the first {}",
                label,
                response.url,
                declared,
                max_pages
            );
            return max_pages;
        }
        declared
    }

    /// Records success, or prunes the brand when it has gone stale
    fn update_summary(
        &self,
        registry: &mut Registry,
        target: &ListingTarget,
        response: &FetchResponse,
        stats: &mut RunStatistics,
    ) {
        let Some(summary) = registry.get_summary_mut(&target.brand_id) else {
            return;
        };

        if response.is_success() {
            summary.record_success(response.requested_at);
            return;
        }

        if summary.is_stale(response.requested_at, self.ctx.staleness_window()) {
            tracing::warn!(
                "Removing brandId '{}' from summary and detail APIs",
                target.brand_id
            );
            let (_, cascaded) = registry.delete_summary(&target.brand_id);
            stats.pruned_providers += 1;
            stats.pruned_items += cascaded as u64;
        }
    }

    /// Folds every item listed on a successful page into the registry
    fn update_details(
        &self,
        registry: &mut Registry,
        target: &ListingTarget,
        response: &FetchResponse,
        stats: &mut RunStatistics,
    ) {
        if registry.get_summary(&target.brand_id).is_none() {
            return;
        }

        let items = response.json().and_then(|body| {
            listing_items(
                body,
                &self.category.listing_key,
                &self.category.item_id_key,
                self.category.classification.key(),
            )
        });
        let Some(items) = items else {
            tracing::error!(
                "{} | Failed to update detail registry: no data.{} list",
                response.url,
                self.category.listing_key
            );
            return;
        };

        for item in &items {
            match registry.create_or_update_detail(&target.brand_id, item, response.requested_at) {
                DetailUpsert::Created => {
                    tracing::info!(
                        "New {} '{}' under brandId '{}'",
                        self.category.item_id_key,
                        item.item_id,
                        target.brand_id
                    );
                    stats.new_items += 1;
                }
                DetailUpsert::Updated => tracing::debug!(
                    "Updating {} '{}' under brandId '{}'",
                    self.category.item_id_key,
                    item.item_id,
                    target.brand_id
                ),
            }
        }
    }

    fn record(&self, target: &ListingTarget, version: &str, response: &FetchResponse) -> ApiResponseRecord {
        ApiResponseRecord {
            url: response.url.clone(),
            provider_id: target.brand_id.clone(),
            provider_name: target.brand_name.clone(),
            status_code: response.status_code,
            is_empty: response.is_success()
                && is_empty_listing(response.json(), &self.category.listing_key),
            api_name: self.category.listing_api_name.clone(),
            api_version: format!("v{}", version),
            requested_at: response.requested_at,
            sub_brand: None,
            category: None,
        }
    }

    /// Writes a version's pages, each brand's list ordered by page number
    fn write_snapshot(&self, version: &str, pages: ListingSnapshot) -> crate::Result<()> {
        if pages.is_empty() {
            return Ok(());
        }

        let snapshot: BTreeMap<String, Vec<FetchResponse>> = pages
            .into_iter()
            .map(|(brand_name, mut pages)| {
                pages.sort_by_key(|(page, _)| *page);
                (brand_name, pages.into_iter().map(|(_, response)| response).collect())
            })
            .collect();

        let file_name = snapshot_filename(
            &self.category.listing_api_name,
            &format!("v{}", version),
            self.ctx.snapshots.run_date(),
        );
        self.ctx
            .snapshots
            .write(&file_name, &serde_json::to_value(&snapshot)?)?;
        Ok(())
    }
}
