use crate::config::types::{CategoryConfig, Config, CrawlerConfig, FetcherConfig};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// A century; longer windows overflow date arithmetic
const MAX_STALENESS_DAYS: i64 = 36_500;

/// One day between attempts is already far past any useful wait
const MAX_WAIT_CEILING_SECS: f64 = 86_400.0;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetcher_config(&config.fetcher)?;
    validate_crawler_config(&config.crawler)?;
    validate_categories(&config.categories)?;
    Ok(())
}

/// Validates fetcher configuration
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 {
        return Err(ConfigError::Validation(
            "max_retries must be >= 1".to_string(),
        ));
    }

    if !config.max_wait_secs.is_finite()
        || config.max_wait_secs < 0.0
        || config.max_wait_secs > MAX_WAIT_CEILING_SECS
    {
        return Err(ConfigError::Validation(format!(
            "max_wait_secs must be between 0 and {}, got {}",
            MAX_WAIT_CEILING_SECS, config.max_wait_secs
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    for proxy in &config.proxies {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    for (prefix, budget) in &config.host_retry_overrides {
        if *budget < 1 {
            return Err(ConfigError::Validation(format!(
                "retry override for '{}' must be >= 1",
                prefix
            )));
        }
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_requests < 1 || config.max_concurrent_requests > 1000 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_requests must be between 1 and 1000, got {}",
            config.max_concurrent_requests
        )));
    }

    if config.max_concurrent_categories < 1 || config.max_concurrent_categories > 1000 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_categories must be between 1 and 1000, got {}",
            config.max_concurrent_categories
        )));
    }

    if config.page_size < 1 {
        return Err(ConfigError::Validation("page_size must be >= 1".to_string()));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation("max_pages must be >= 1".to_string()));
    }

    if config.staleness_days < 1 || config.staleness_days > MAX_STALENESS_DAYS {
        return Err(ConfigError::Validation(format!(
            "staleness_days must be between 1 and {}, got {}",
            MAX_STALENESS_DAYS, config.staleness_days
        )));
    }

    Ok(())
}

/// Validates crawl categories
fn validate_categories(categories: &[CategoryConfig]) -> Result<(), ConfigError> {
    if categories.is_empty() {
        return Err(ConfigError::Validation(
            "at least one category is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for category in categories {
        validate_category_name(&category.name)?;

        if !seen.insert(category.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate category '{}'",
                category.name
            )));
        }

        Url::parse(&category.directory_endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid directory endpoint '{}': {}",
                category.directory_endpoint, e
            ))
        })?;

        if !category.listing_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "listing_path for '{}' must start with '/'",
                category.name
            )));
        }

        for (field, value) in [
            ("listing_api_name", &category.listing_api_name),
            ("detail_api_name", &category.detail_api_name),
            ("listing_key", &category.listing_key),
            ("item_id_key", &category.item_id_key),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{} for '{}' cannot be empty",
                    field, category.name
                )));
            }
        }

        if category.listing_versions.is_empty() || category.detail_versions.is_empty() {
            return Err(ConfigError::Validation(format!(
                "category '{}' must list at least one listing and one detail version",
                category.name
            )));
        }
    }

    Ok(())
}

/// Category names end up in file names, so keep them simple
fn validate_category_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "category name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "category name must contain only alphanumeric characters, '-' or '_', got '{}'",
            name
        )));
    }

    Ok(())
}
