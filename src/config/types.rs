use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Browser-like user agent; several providers reject obvious bot agents
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetcher: FetcherConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(rename = "category", default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig::default(),
            crawler: CrawlerConfig::default(),
            output: OutputConfig::default(),
            categories: default_categories(),
        }
    }
}

impl Config {
    /// Looks up a category by name
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// Resilient fetcher configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetcherConfig {
    /// Attempts per logical request
    pub max_retries: u32,

    /// Ceiling on any single wait between attempts (seconds)
    pub max_wait_secs: f64,

    /// Overall timeout of one attempt, body included (seconds)
    pub request_timeout_secs: u64,

    /// Response headers (lowercase) stripped before a response is returned
    pub sensitive_headers: Vec<String>,

    /// Proxy URLs used when a provider answers 403
    pub proxies: Vec<String>,

    /// URL prefix -> retry budget, for hosts that need more patience
    pub host_retry_overrides: BTreeMap<String, u32>,

    /// Skip TLS certificate verification
    pub accept_invalid_certs: bool,

    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_wait_secs: 60.0,
            request_timeout_secs: 30,
            sensitive_headers: vec!["set-cookie".to_string(), "authorization".to_string()],
            proxies: Vec::new(),
            host_retry_overrides: BTreeMap::from([("https://ob.tmbl.com.au/".to_string(), 10)]),
            accept_invalid_certs: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Crawl orchestration limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// In-flight fetch ceiling per orchestrator
    pub max_concurrent_requests: usize,

    /// Number of crawl categories run at once
    pub max_concurrent_categories: usize,

    /// Page size requested from listing endpoints
    pub page_size: u32,

    /// Ceiling on the total page count a listing may declare
    pub max_pages: u32,

    /// Days without success and without sighting before an entry is pruned
    pub staleness_days: i64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 100,
            max_concurrent_categories: 2,
            page_size: 500,
            max_pages: 1000,
            staleness_days: crate::state::STALENESS_WINDOW_DAYS,
        }
    }
}

/// Output locations
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OutputConfig {
    /// Root directory for per-run snapshot files
    pub snapshot_dir: PathBuf,

    /// Directory holding the registry files
    pub registry_dir: PathBuf,

    /// Mounted remote mirror for registry files
    pub mirror_dir: Option<PathBuf>,

    /// SQLite file receiving per-request bookkeeping records
    pub responses_database: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("data/historic"),
            registry_dir: PathBuf::from("data/registry"),
            mirror_dir: None,
            responses_database: None,
        }
    }
}

/// Name of the classification field carried on detail records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationField {
    ProductCategory,
    FuelType,
}

impl ClassificationField {
    /// The JSON key used by both the provider payloads and the registry files
    pub fn key(&self) -> &'static str {
        match self {
            Self::ProductCategory => "productCategory",
            Self::FuelType => "fuelType",
        }
    }
}

/// One independent crawl category
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CategoryConfig {
    pub name: String,

    /// Top-level data holder brand directory
    pub directory_endpoint: String,

    #[serde(default = "default_directory_version")]
    pub directory_version: String,

    /// Path appended to each brand's base URI for the listing endpoint
    pub listing_path: String,

    pub listing_api_name: String,

    pub listing_versions: Vec<String>,

    /// Key of the item list inside a listing payload's `data` object
    pub listing_key: String,

    pub detail_api_name: String,

    pub detail_versions: Vec<String>,

    /// Key of the item identifier inside each listed item
    pub item_id_key: String,

    pub classification: ClassificationField,

    /// Hand every fetch outcome to the response recorder
    #[serde(default)]
    pub record_responses: bool,
}

impl CategoryConfig {
    pub fn summary_registry_file(&self) -> String {
        format!("{}-summary-apis.json", self.name)
    }

    pub fn detail_registry_file(&self) -> String {
        format!("{}-detail-apis.json", self.name)
    }
}

fn default_directory_version() -> String {
    "1".to_string()
}

/// The two reference categories
pub fn default_categories() -> Vec<CategoryConfig> {
    vec![
        CategoryConfig {
            name: "banking".to_string(),
            directory_endpoint:
                "https://api.cdr.gov.au/cdr-register/v1/banking/data-holders/brands/summary"
                    .to_string(),
            directory_version: default_directory_version(),
            listing_path: "/cds-au/v1/banking/products".to_string(),
            listing_api_name: "Get Products".to_string(),
            listing_versions: vec!["3".to_string(), "4".to_string()],
            listing_key: "products".to_string(),
            detail_api_name: "Get Product Detail".to_string(),
            detail_versions: vec!["4".to_string(), "5".to_string(), "6".to_string()],
            item_id_key: "productId".to_string(),
            classification: ClassificationField::ProductCategory,
            record_responses: true,
        },
        CategoryConfig {
            name: "energy".to_string(),
            directory_endpoint:
                "https://api.cdr.gov.au/cdr-register/v1/energy/data-holders/brands/summary"
                    .to_string(),
            directory_version: default_directory_version(),
            listing_path: "/cds-au/v1/energy/plans".to_string(),
            listing_api_name: "Get Generic Plans".to_string(),
            listing_versions: vec!["1".to_string()],
            listing_key: "plans".to_string(),
            detail_api_name: "Get Generic Plan Detail".to_string(),
            detail_versions: vec!["3".to_string()],
            item_id_key: "planId".to_string(),
            classification: ClassificationField::FuelType,
            record_responses: false,
        },
    ]
}
