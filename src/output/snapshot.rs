//! JSON snapshot files
//!
//! Each run writes its raw fetch results under `<snapshot dir>/<run date>/`,
//! one file per API name and version.

use crate::output::traits::{OutputError, OutputResult, SnapshotWriter};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot file name for one API version of one run
///
/// # Examples
///
/// ```
/// use cdr_crawler::output::snapshot_filename;
///
/// assert_eq!(
///     snapshot_filename("Get Product Detail", "v4", "2024-06-01"),
///     "get_product_detail_v4_2024-06-01.json"
/// );
/// ```
pub fn snapshot_filename(api_name: &str, version_label: &str, run_date: &str) -> String {
    format!(
        "{}_{}_{}.json",
        api_name.replace(' ', "_").to_lowercase(),
        version_label,
        run_date
    )
}

/// Snapshot file name for a category's brand directory document
pub fn directory_snapshot_filename(category: &str, run_date: &str) -> String {
    format!("dh_brand_summary_{}_{}.json", category, run_date)
}

/// Writes pretty-printed JSON snapshots to the local filesystem
#[derive(Debug, Clone)]
pub struct JsonSnapshotWriter {
    root: PathBuf,
    run_date: String,
}

impl JsonSnapshotWriter {
    pub fn new(root: impl Into<PathBuf>, run_date: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            run_date: run_date.into(),
        }
    }

    /// Directory holding this run's files
    pub fn run_dir(&self) -> PathBuf {
        self.root.join(&self.run_date)
    }
}

impl SnapshotWriter for JsonSnapshotWriter {
    fn run_date(&self) -> &str {
        &self.run_date
    }

    fn write(&self, file_name: &str, contents: &Value) -> OutputResult<PathBuf> {
        let path = self.run_dir().join(file_name);
        tracing::info!("Writing to {}", file_name);
        write_json(&path, contents)?;
        Ok(path)
    }
}

fn write_json(path: &Path, contents: &Value) -> OutputResult<()> {
    let write_error = |source| OutputError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    let json = serde_json::to_string_pretty(contents)?;
    fs::write(path, json).map_err(write_error)
}
