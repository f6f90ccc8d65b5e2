//! CDR crawler main entry point
//!
//! This is the command-line interface for the Consumer Data Right product
//! and plan crawler.

use anyhow::Context;
use cdr_crawler::config::{load_config_with_hash, validate, Config};
use cdr_crawler::crawler::{run_crawl, select_categories, RunOptions};
use cdr_crawler::output::{print_registry_statistics, RegistryStatistics};
use cdr_crawler::storage::open_registry;
use chrono::{Duration, Utc};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CDR crawler: keeps a registry of public product and plan endpoints
///
/// Each run fetches the data holder brand directory, every brand's listing
/// endpoint and every known item's detail endpoint, writes the raw results
/// as dated snapshots, and prunes endpoints that have stopped responding.
#[derive(Parser, Debug)]
#[command(name = "cdr-crawler")]
#[command(version = "1.0.0")]
#[command(about = "Consumer Data Right product and plan crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (built-in defaults when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Run date used to name snapshot files (YYYY-MM-DD, default today in UTC)
    #[arg(long, value_name = "DATE")]
    date: Option<String>,

    /// Only run the named category (repeatable)
    #[arg(long = "category", value_name = "NAME")]
    categories: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show registry statistics and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Neither pull registry files from nor push them to the mirror
    #[arg(long)]
    no_mirror: bool,

    /// Run as the backup deployment (notifications are marked "Backup")
    #[arg(long)]
    backup: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = load(&cli)?;
    let run_date = match &cli.date {
        Some(date) => {
            chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .with_context(|| format!("Invalid --date '{}', expected YYYY-MM-DD", date))?;
            date.clone()
        }
        None => Utc::now().format("%Y-%m-%d").to_string(),
    };

    if cli.dry_run {
        return handle_dry_run(&config, &cli.categories, &run_date);
    }
    if cli.stats {
        return handle_stats(&config, &cli.categories, !cli.no_mirror);
    }

    let options = RunOptions {
        run_date,
        categories: cli.categories,
        use_mirror: !cli.no_mirror,
        backup: cli.backup,
    };
    let outcomes = run_crawl(config, options).await?;

    let failed: Vec<_> = outcomes.iter().filter(|o| !o.success).collect();
    for outcome in &failed {
        tracing::error!(
            "{} crawl failed: {}",
            outcome.category,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    if !failed.is_empty() {
        anyhow::bail!("{} of {} categories failed", failed.len(), outcomes.len());
    }

    tracing::info!("Crawl completed successfully");
    Ok(())
}

/// Loads the configuration file, or the built-in defaults when none is given
fn load(cli: &Cli) -> anyhow::Result<Config> {
    let Some(path) = &cli.config else {
        tracing::info!("No configuration file given, using built-in defaults");
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    };

    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);
    Ok(config)
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("cdr_crawler=info,warn"),
            1 => EnvFilter::new("cdr_crawler=debug,info"),
            2 => EnvFilter::new("cdr_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the resolved configuration
fn handle_dry_run(config: &Config, names: &[String], run_date: &str) -> anyhow::Result<()> {
    let categories = select_categories(config, names)?;

    println!("=== CDR Crawler Dry Run ===\n");
    println!("Run date: {}", run_date);

    println!("\nFetcher:");
    println!("  Max retries: {}", config.fetcher.max_retries);
    println!("  Max wait: {}s", config.fetcher.max_wait_secs);
    println!("  Request timeout: {}s", config.fetcher.request_timeout_secs);
    println!("  Proxies: {}", config.fetcher.proxies.len());
    for (prefix, retries) in &config.fetcher.host_retry_overrides {
        println!("  Retry override: {} -> {}", prefix, retries);
    }

    println!("\nCrawler:");
    println!(
        "  Max concurrent requests: {}",
        config.crawler.max_concurrent_requests
    );
    println!(
        "  Max concurrent categories: {}",
        config.crawler.max_concurrent_categories
    );
    println!("  Page size: {}", config.crawler.page_size);
    println!("  Staleness window: {} days", config.crawler.staleness_days);

    println!("\nOutput:");
    println!("  Snapshots: {}", config.output.snapshot_dir.display());
    println!("  Registry: {}", config.output.registry_dir.display());
    if let Some(mirror) = &config.output.mirror_dir {
        println!("  Mirror: {}", mirror.display());
    }
    if let Some(database) = &config.output.responses_database {
        println!("  Responses database: {}", database.display());
    }

    println!("\nCategories ({}):", categories.len());
    for category in &categories {
        println!("  - {}", category.name);
        println!("    Directory: {} (v{})", category.directory_endpoint, category.directory_version);
        println!(
            "    Listing: {} {} (v{})",
            category.listing_api_name,
            category.listing_path,
            category.listing_versions.join(", v")
        );
        println!(
            "    Detail: {} (v{})",
            category.detail_api_name,
            category.detail_versions.join(", v")
        );
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows registry statistics per category
fn handle_stats(config: &Config, names: &[String], use_mirror: bool) -> anyhow::Result<()> {
    let window = Duration::days(config.crawler.staleness_days);
    let now = Utc::now();

    for category in select_categories(config, names)? {
        let mut registry = open_registry(category, &config.output, use_mirror);
        registry
            .load()
            .with_context(|| format!("Failed to load {} registry", category.name))?;

        print_registry_statistics(&RegistryStatistics::collect(&registry, now, window));
    }

    Ok(())
}
