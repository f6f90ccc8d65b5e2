//! Crawler module for the CDR crawl engine
//!
//! This module contains the core crawling logic, including:
//! - Resilient HTTP fetching with retries and proxy fallback
//! - Payload inspection (pagination, item identifiers, brand records)
//! - Bounded-concurrency request scheduling
//! - Directory, listing and detail orchestration
//! - Overall per-category run coordination

mod context;
mod coordinator;
mod detail;
mod directory;
mod discovery;
mod fetcher;
pub mod parser;
mod response;
mod scheduler;

pub use context::CrawlContext;
pub use coordinator::{
    run_crawl, select_categories, CategoryOutcome, Coordinator, RunOptions,
};
pub use detail::DetailOrchestrator;
pub use directory::{DirectoryOrchestrator, DIRECTORY_API_NAME};
pub use discovery::DiscoveryOrchestrator;
pub use fetcher::{backoff_delay, build_http_client, parse_retry_after, proxy_budget, Fetcher};
pub use response::{FetchFailure, FetchResponse, ResponseBody};
pub use scheduler::{request_label, versioned_headers, FetchRequest, RequestLimiter};

