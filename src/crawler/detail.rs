//! Detail fetch
//!
//! Every registry item whose brand is known and neither the brand nor the
//! item is skipped gets one request per detail API version. Success refreshes
//! the item's `lastSuccessAt`; failure may prune the item (never its brand).

use crate::config::CategoryConfig;
use crate::crawler::context::CrawlContext;
use crate::crawler::parser::is_empty_detail;
use crate::crawler::scheduler::{request_label, versioned_headers, FetchRequest, RequestLimiter};
use crate::crawler::FetchResponse;
use crate::output::{snapshot_filename, ApiResponseRecord, RunStatistics, Stage};
use crate::storage::Registry;
use crate::url::item_url;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::time::Instant;

/// One item's detail endpoint, resolved for this run
#[derive(Debug, Clone)]
struct DetailTarget {
    brand_id: String,
    brand_name: String,
    item_id: String,
    url: String,
    sub_brand: Option<String>,
    category: Option<String>,
}

/// Responses of one version, by brand name then item id
type DetailSnapshot = BTreeMap<String, BTreeMap<String, FetchResponse>>;

/// Fetches every known detail endpoint
#[derive(Debug)]
pub struct DetailOrchestrator<'a> {
    ctx: &'a CrawlContext,
    category: &'a CategoryConfig,
}

impl<'a> DetailOrchestrator<'a> {
    pub fn new(ctx: &'a CrawlContext, category: &'a CategoryConfig) -> Self {
        Self { ctx, category }
    }

    /// Fetches every item for every detail version and writes one snapshot per version
    pub async fn run(&self, registry: &mut Registry) -> crate::Result<RunStatistics> {
        tracing::info!("{} ({}) running...", Stage::Detail, self.category.name);
        let start = Instant::now();

        let result = self.crawl(registry).await;
        self.ctx
            .report_stage(&self.category.name, Stage::Detail, &result);

        tracing::info!(
            "...{} ({}) finished ({:.2} seconds)",
            Stage::Detail,
            self.category.name,
            start.elapsed().as_secs_f64()
        );
        result
    }

    async fn crawl(&self, registry: &mut Registry) -> crate::Result<RunStatistics> {
        let limiter = self.ctx.limiter();
        let targets = self.targets(registry);
        let mut stats = RunStatistics::default();
        let mut records = Vec::new();

        for version in &self.category.detail_versions {
            let headers = versioned_headers(version);
            let mut snapshot = DetailSnapshot::new();

            tracing::info!(
                "Fetching {} v{} for {} items",
                self.category.detail_api_name,
                version,
                targets.len()
            );

            let mut in_flight: FuturesUnordered<_> = targets
                .iter()
                .map(|target| self.fetch_detail(&limiter, target, version, &headers))
                .collect();

            while let Some((target, response)) = in_flight.next().await {
                stats.record_request(response.is_success());
                self.update_detail(registry, target, &response, &mut stats);

                if self.ctx.records_responses(self.category) {
                    records.push(self.record(target, version, &response));
                }
                snapshot
                    .entry(target.brand_name.clone())
                    .or_default()
                    .insert(target.item_id.clone(), response);
            }

            self.write_snapshot(version, &snapshot)?;
        }

        self.ctx.submit_records(&records);
        Ok(stats)
    }

    /// Resolves detail URLs of every fetchable item
    fn targets(&self, registry: &Registry) -> Vec<DetailTarget> {
        tracing::info!("Retrieving endpoints from registry");
        let mut targets = Vec::new();

        for (brand_id, items) in registry.details() {
            let Some(summary) = registry.get_summary(brand_id) else {
                tracing::warn!(
                    "Brand ID '{}' in detail APIs not found in summary APIs",
                    brand_id
                );
                continue;
            };
            if summary.skip {
                tracing::info!("Skipping brandId '{}'", brand_id);
                continue;
            }

            for (item_id, detail) in items {
                if detail.skip {
                    tracing::info!(
                        "Skipping {} '{}' under brandId '{}'",
                        self.category.item_id_key,
                        item_id,
                        brand_id
                    );
                    continue;
                }

                match item_url(
                    summary.effective_base_uri(),
                    &self.category.listing_path,
                    item_id,
                ) {
                    Ok(url) => targets.push(DetailTarget {
                        brand_id: brand_id.clone(),
                        brand_name: summary.effective_name().to_string(),
                        item_id: item_id.clone(),
                        url: url.to_string(),
                        sub_brand: detail.sub_brand.clone(),
                        category: detail.category.clone(),
                    }),
                    Err(e) => tracing::warn!(
                        "Skipping {} '{}' under brandId '{}': {}",
                        self.category.item_id_key,
                        item_id,
                        brand_id,
                        e
                    ),
                }
            }
        }

        targets
    }

    async fn fetch_detail<'t>(
        &self,
        limiter: &RequestLimiter,
        target: &'t DetailTarget,
        version: &str,
        headers: &BTreeMap<String, String>,
    ) -> (&'t DetailTarget, FetchResponse) {
        let label = request_label(&self.category.detail_api_name, version, &target.brand_name);
        let request = FetchRequest::new(target.url.clone(), headers.clone(), label);
        let response = limiter.fetch(&self.ctx.fetcher, &request).await;
        (target, response)
    }

    /// Records success, or prunes the item when it has gone stale
    fn update_detail(
        &self,
        registry: &mut Registry,
        target: &DetailTarget,
        response: &FetchResponse,
        stats: &mut RunStatistics,
    ) {
        let Some(detail) = registry.get_detail_mut(&target.brand_id, &target.item_id) else {
            return;
        };

        if response.is_success() {
            detail.record_success(response.requested_at);
            return;
        }

        if detail.is_stale(response.requested_at, self.ctx.staleness_window()) {
            tracing::warn!(
                "Removing {} '{}' under brandId '{}' from detail APIs",
                self.category.item_id_key,
                target.item_id,
                target.brand_id
            );
            stats.pruned_items +=
                registry.delete_detail(&target.brand_id, Some(&target.item_id)) as u64;
        }
    }

    fn record(&self, target: &DetailTarget, version: &str, response: &FetchResponse) -> ApiResponseRecord {
        ApiResponseRecord {
            url: response.url.clone(),
            provider_id: target.brand_id.clone(),
            provider_name: target.brand_name.clone(),
            status_code: response.status_code,
            is_empty: response.is_success() && is_empty_detail(response.json()),
            api_name: self.category.detail_api_name.clone(),
            api_version: format!("v{}", version),
            requested_at: response.requested_at,
            sub_brand: target.sub_brand.clone(),
            category: target.category.clone(),
        }
    }

    fn write_snapshot(&self, version: &str, snapshot: &DetailSnapshot) -> crate::Result<()> {
        if snapshot.is_empty() {
            return Ok(());
        }

        let file_name = snapshot_filename(
            &self.category.detail_api_name,
            &format!("v{}", version),
            self.ctx.snapshots.run_date(),
        );
        self.ctx
            .snapshots
            .write(&file_name, &serde_json::to_value(snapshot)?)?;
        Ok(())
    }
}
