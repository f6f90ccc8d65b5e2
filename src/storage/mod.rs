//! Storage module for persisting crawl state
//!
//! This module handles everything that outlives a run, including:
//! - The per-category endpoint registry (JSON files)
//! - Best-effort mirroring of registry files to remote storage
//! - SQLite bookkeeping of individual API responses

mod mirror;
mod registry;
mod schema;
mod sqlite;
mod traits;

pub use mirror::{DirectoryMirror, MIRROR_PREFIX};
pub use registry::{DetailMap, DetailUpsert, Registry, SummaryMap};
pub use schema::initialize_schema;
pub use sqlite::SqliteRecorder;
pub use traits::{MirrorError, MirrorResult, RegistryError, RegistryMirror, RegistryResult};

use crate::config::{CategoryConfig, OutputConfig};
use std::sync::Arc;

/// Opens a category's registry as configured, without loading it
///
/// # Arguments
///
/// * `category` - The crawl category the registry belongs to
/// * `output` - Output locations (registry and mirror directories)
/// * `use_mirror` - Whether to attach the configured mirror, if any
pub fn open_registry(category: &CategoryConfig, output: &OutputConfig, use_mirror: bool) -> Registry {
    let registry = Registry::new(category, &output.registry_dir);
    match (&output.mirror_dir, use_mirror) {
        (Some(dir), true) => registry.with_mirror(Arc::new(DirectoryMirror::new(dir))),
        _ => registry,
    }
}
