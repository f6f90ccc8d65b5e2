//! Crawler coordinator - top-level run orchestration
//!
//! This module runs crawl categories end to end, including:
//! - Loading each category's registry (refreshing it from the mirror)
//! - Running directory, listing and detail stages in order
//! - Saving the registry only when every stage completed
//! - Bounding how many categories run at once

use crate::config::{CategoryConfig, Config};
use crate::crawler::context::CrawlContext;
use crate::crawler::detail::DetailOrchestrator;
use crate::crawler::directory::DirectoryOrchestrator;
use crate::crawler::discovery::DiscoveryOrchestrator;
use crate::crawler::scheduler::RequestLimiter;
use crate::crawler::Fetcher;
use crate::output::{
    log_run_statistics, JsonSnapshotWriter, LogNotifier, RunOutcome, RunStatistics, Stage,
};
use crate::storage::{open_registry, Registry, SqliteRecorder};
use crate::ConfigError;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Instant;

/// Result of one category run
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryOutcome {
    pub category: String,
    /// True when every stage completed and the registry was saved
    pub success: bool,
    pub error: Option<String>,
    pub stats: RunStatistics,
}

/// Options of a crawl invocation that are not part of the configuration file
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// `YYYY-MM-DD` date namespacing snapshot files
    pub run_date: String,
    /// Category names to run; empty runs every configured category
    pub categories: Vec<String>,
    /// Pull and push registry files through the configured mirror
    pub use_mirror: bool,
    /// Marks operator notifications as coming from the backup deployment
    pub backup: bool,
}

impl RunOptions {
    /// Notifier for this run; backup runs prefix every title with "Backup "
    pub fn notifier(&self) -> LogNotifier {
        if self.backup {
            LogNotifier::with_prefix("Backup ")
        } else {
            LogNotifier::new()
        }
    }
}

/// Runs crawl categories against shared collaborators
#[derive(Debug)]
pub struct Coordinator {
    config: Arc<Config>,
    ctx: CrawlContext,
    use_mirror: bool,
}

impl Coordinator {
    pub fn new(config: Arc<Config>, ctx: CrawlContext, use_mirror: bool) -> Self {
        Self {
            config,
            ctx,
            use_mirror,
        }
    }

    pub fn context(&self) -> &CrawlContext {
        &self.ctx
    }

    /// Runs one category: load, directory, listing, detail, save
    ///
    /// Never fails; the outcome carries the error. A failed stage leaves the
    /// persisted registry untouched.
    pub async fn run_category(&self, category: &CategoryConfig) -> CategoryOutcome {
        let registry = open_registry(category, &self.config.output, self.use_mirror);
        self.run_category_with(category, registry).await
    }

    /// As [`Coordinator::run_category`], with a caller-provided registry
    pub async fn run_category_with(
        &self,
        category: &CategoryConfig,
        mut registry: Registry,
    ) -> CategoryOutcome {
        let start = Instant::now();
        tracing::info!("Starting {} crawl", category.name);

        if let Err(e) = registry.load() {
            return self.registry_failure(category, RunStatistics::default(), e);
        }

        let stats = match self.run_stages(category, &mut registry).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(
                    "{} crawl failed, registry not saved: {}",
                    category.name,
                    e
                );
                return CategoryOutcome {
                    category: category.name.clone(),
                    success: false,
                    error: Some(e.to_string()),
                    stats: RunStatistics::default(),
                };
            }
        };

        if let Err(e) = registry.save() {
            return self.registry_failure(category, stats, e);
        }

        log_run_statistics(&format!("{} crawl", category.name), &stats);
        tracing::info!(
            "Finished {} crawl ({:.2} seconds)",
            category.name,
            start.elapsed().as_secs_f64()
        );
        CategoryOutcome {
            category: category.name.clone(),
            success: true,
            error: None,
            stats,
        }
    }

    /// Runs `categories` with at most `max-concurrent-categories` at once
    ///
    /// Outcomes are returned in the order the categories were given.
    pub async fn run_all_categories(&self, categories: &[&CategoryConfig]) -> Vec<CategoryOutcome> {
        let limiter = RequestLimiter::new(self.config.crawler.max_concurrent_categories);

        let mut runs: FuturesUnordered<_> = categories
            .iter()
            .enumerate()
            .map(|(index, category)| {
                let limiter = &limiter;
                async move { (index, limiter.run(self.run_category(category)).await) }
            })
            .collect();

        let mut outcomes = Vec::with_capacity(categories.len());
        while let Some(outcome) = runs.next().await {
            outcomes.push(outcome);
        }
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn run_stages(
        &self,
        category: &CategoryConfig,
        registry: &mut Registry,
    ) -> crate::Result<RunStatistics> {
        let mut stats = RunStatistics::default();
        stats += DirectoryOrchestrator::new(&self.ctx, category)
            .run(registry)
            .await?;
        stats += DiscoveryOrchestrator::new(&self.ctx, category)
            .run(registry)
            .await?;
        stats += DetailOrchestrator::new(&self.ctx, category)
            .run(registry)
            .await?;
        Ok(stats)
    }

    fn registry_failure(
        &self,
        category: &CategoryConfig,
        stats: RunStatistics,
        error: crate::storage::RegistryError,
    ) -> CategoryOutcome {
        tracing::error!("{} registry failed: {}", category.name, error);
        self.ctx
            .notifier
            .notify(&RunOutcome::failed(&category.name, Stage::Registry, &error));
        CategoryOutcome {
            category: category.name.clone(),
            success: false,
            error: Some(error.to_string()),
            stats,
        }
    }
}

/// Selects the categories named in `names` (all when empty)
pub fn select_categories<'c>(
    config: &'c Config,
    names: &[String],
) -> Result<Vec<&'c CategoryConfig>, ConfigError> {
    if names.is_empty() {
        return Ok(config.categories.iter().collect());
    }

    names
        .iter()
        .map(|name| {
            config
                .category(name)
                .ok_or_else(|| ConfigError::Validation(format!("Unknown category '{}'", name)))
        })
        .collect()
}

/// Runs a complete crawl with the default collaborators
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Build the shared fetcher
/// 2. Open the snapshot writer and the optional response database
/// 3. Run the selected categories under the category ceiling
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `options` - Run date, category filter and mirror switch
///
/// # Returns
///
/// * `Ok(Vec<CategoryOutcome>)` - One outcome per selected category
/// * `Err(CrawlError)` - The crawl could not start
pub async fn run_crawl(config: Config, options: RunOptions) -> crate::Result<Vec<CategoryOutcome>> {
    let config = Arc::new(config);
    let categories = select_categories(&config, &options.categories)?;

    let fetcher = Arc::new(Fetcher::new(config.fetcher.clone())?);
    let snapshots = Arc::new(JsonSnapshotWriter::new(
        config.output.snapshot_dir.clone(),
        options.run_date.clone(),
    ));
    let mut ctx = CrawlContext::new(
        fetcher,
        config.crawler.clone(),
        snapshots,
        Arc::new(options.notifier()),
    );

    if let Some(path) = &config.output.responses_database {
        match SqliteRecorder::new(path) {
            Ok(recorder) => ctx = ctx.with_recorder(Arc::new(recorder)),
            Err(e) => tracing::error!(
                "Failed to open response database {}, responses will not be recorded: {}",
                path.display(),
                e
            ),
        }
    }

    let coordinator = Coordinator::new(config.clone(), ctx, options.use_mirror);
    Ok(coordinator.run_all_categories(&categories).await)
}
