//! Output collaborator traits and types
//!
//! Orchestrators hand their results to three narrow collaborators:
//! - [`SnapshotWriter`]: archives the raw fetch results of a run
//! - [`Notifier`]: reports whether each stage succeeded
//! - [`ResponseRecorder`]: keeps a flat bookkeeping row per fetch

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to format output: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Archives raw fetch results
pub trait SnapshotWriter: fmt::Debug + Send + Sync {
    /// Date string namespacing this run's files (`YYYY-MM-DD`)
    fn run_date(&self) -> &str;

    /// Writes `contents` as the run's `file_name`
    ///
    /// # Returns
    ///
    /// * `Ok(PathBuf)` - Where the snapshot landed
    /// * `Err(OutputError)` - The snapshot could not be written
    fn write(&self, file_name: &str, contents: &Value) -> OutputResult<PathBuf>;
}

/// Stage of a category run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Directory,
    Listing,
    Detail,
    /// Registry load/save around the stages
    Registry,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Directory => "Directory discovery",
            Self::Listing => "Listing discovery",
            Self::Detail => "Detail fetch",
            Self::Registry => "Registry",
        };
        f.write_str(name)
    }
}

/// Success or failure of one stage of one category run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub category: String,
    pub stage: Stage,
    pub success: bool,
    /// Rendered error when `success` is false
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn succeeded(category: impl Into<String>, stage: Stage) -> Self {
        Self {
            category: category.into(),
            stage,
            success: true,
            error: None,
        }
    }

    pub fn failed(category: impl Into<String>, stage: Stage, error: impl fmt::Display) -> Self {
        Self {
            category: category.into(),
            stage,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Delivers run outcomes to operators
///
/// Delivery problems are the notifier's own to log; they never reach the run.
pub trait Notifier: fmt::Debug + Send + Sync {
    fn notify(&self, outcome: &RunOutcome);
}

/// One bookkeeping row per fetch outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponseRecord {
    pub url: String,
    pub provider_id: String,
    pub provider_name: String,
    pub status_code: Option<u16>,
    /// True when a 200 payload listed nothing; false for every non-200
    pub is_empty: bool,
    pub api_name: String,
    /// `v<version>`
    pub api_version: String,
    pub requested_at: DateTime<Utc>,
    pub sub_brand: Option<String>,
    pub category: Option<String>,
}

/// Persists bookkeeping rows, one batch per orchestrator run
pub trait ResponseRecorder: fmt::Debug + Send + Sync {
    /// Stores `records` as one batch and returns how many were stored
    fn record_batch(&self, records: &[ApiResponseRecord]) -> OutputResult<usize>;
}
