//! CDR crawler: a resilient crawler for federated product-reference APIs
//!
//! This crate periodically walks a directory of data holder brands, pages
//! through each brand's listing endpoint, fetches every listed item's detail
//! endpoint, and keeps a durable registry of which endpoints exist, which are
//! healthy, and which have gone stale.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for crawl operations
///
/// Individual fetch failures never surface here: they are recorded on the
/// returned [`crawler::FetchResponse`]. A `CrawlError` aborts the stage it
/// occurs in, and the category run it belongs to ends without saving.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] storage::RegistryError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL '{url}': {source}")]
    Parse {
        url: String,
        #[source]
        source: ::url::ParseError,
    },

    #[error("URL '{0}' cannot carry a path")]
    CannotBeABase(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Fetcher, FetchResponse};
pub use state::{DetailEndpoint, SummaryEndpoint};
pub use storage::Registry;
