//! Durable registry of known endpoints
//!
//! One [`Registry`] holds a crawl category's summary endpoints (keyed by brand
//! id) and detail endpoints (keyed by brand id, then item id). It is loaded
//! once before a run and saved once after it, as a whole.

use crate::config::{CategoryConfig, ClassificationField};
use crate::state::{DetailEndpoint, ItemObservation, SummaryEndpoint};
use crate::storage::traits::{RegistryError, RegistryMirror, RegistryResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Neutral key used for the classification field in memory
const CATEGORY_FIELD: &str = "category";

pub type SummaryMap = BTreeMap<String, SummaryEndpoint>;
pub type DetailMap = BTreeMap<String, BTreeMap<String, DetailEndpoint>>;

/// Outcome of [`Registry::create_or_update_detail`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailUpsert {
    Created,
    Updated,
}

/// Registry for one crawl category
#[derive(Debug)]
pub struct Registry {
    category: String,
    classification: ClassificationField,
    summary_path: PathBuf,
    detail_path: PathBuf,
    mirror: Option<Arc<dyn RegistryMirror>>,
    summaries: SummaryMap,
    details: DetailMap,
}

impl Registry {
    /// Creates an empty registry whose files live in `registry_dir`
    pub fn new(category: &CategoryConfig, registry_dir: &Path) -> Self {
        Self {
            category: category.name.clone(),
            classification: category.classification,
            summary_path: registry_dir.join(category.summary_registry_file()),
            detail_path: registry_dir.join(category.detail_registry_file()),
            mirror: None,
            summaries: BTreeMap::new(),
            details: BTreeMap::new(),
        }
    }

    /// Attaches a remote mirror refreshed on load and updated on save
    pub fn with_mirror(mut self, mirror: Arc<dyn RegistryMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    pub fn detail_path(&self) -> &Path {
        &self.detail_path
    }

    /// Replaces in-memory state with the persisted registry
    ///
    /// The mirror is pulled first; a mirror failure is logged and the local
    /// files are used as they are. Missing files mean an empty registry.
    /// A file that exists but does not parse is an error.
    pub fn load(&mut self) -> RegistryResult<()> {
        self.refresh_from_mirror(&self.summary_path);
        self.refresh_from_mirror(&self.detail_path);

        self.summaries = read_registry_file(&self.summary_path)?.unwrap_or_default();
        self.details = read_registry_file(&self.detail_path)?.unwrap_or_default();

        tracing::info!(
            "Loaded {} registry: {} brands, {} items",
            self.category,
            self.summaries.len(),
            self.detail_count()
        );
        Ok(())
    }

    /// Persists the registry locally, then pushes it to the mirror
    ///
    /// Only the local write can fail the save.
    pub fn save(&self) -> RegistryResult<()> {
        let summaries = serde_json::to_value(&self.summaries)?;
        let mut details = serde_json::to_value(&self.details)?;
        rename_classification(&mut details, self.classification.key());

        write_registry_file(&self.summary_path, &summaries)?;
        write_registry_file(&self.detail_path, &details)?;

        if let Some(mirror) = &self.mirror {
            for path in [&self.summary_path, &self.detail_path] {
                let Some(file_name) = file_name(path) else {
                    continue;
                };
                if let Err(e) = mirror.push(path, file_name) {
                    tracing::warn!("Failed to mirror {}: {}", path.display(), e);
                }
            }
        }

        tracing::info!(
            "Saved {} registry: {} brands, {} items",
            self.category,
            self.summaries.len(),
            self.detail_count()
        );
        Ok(())
    }

    // ===== Summary endpoints =====

    pub fn get_summary(&self, brand_id: &str) -> Option<&SummaryEndpoint> {
        self.summaries.get(brand_id)
    }

    pub fn get_summary_mut(&mut self, brand_id: &str) -> Option<&mut SummaryEndpoint> {
        self.summaries.get_mut(brand_id)
    }

    /// Inserts a summary endpoint, replacing any entry with the same id
    pub fn create_summary(&mut self, brand_id: impl Into<String>, endpoint: SummaryEndpoint) {
        self.summaries.insert(brand_id.into(), endpoint);
    }

    /// Removes a summary endpoint and every detail endpoint under it
    ///
    /// # Returns
    ///
    /// The removed summary (if any) and the number of detail endpoints removed
    pub fn delete_summary(&mut self, brand_id: &str) -> (Option<SummaryEndpoint>, usize) {
        let removed = self.summaries.remove(brand_id);
        let cascaded = self.delete_detail(brand_id, None);
        (removed, cascaded)
    }

    pub fn summaries(&self) -> &SummaryMap {
        &self.summaries
    }

    pub fn summaries_mut(&mut self) -> impl Iterator<Item = (&String, &mut SummaryEndpoint)> {
        self.summaries.iter_mut()
    }

    // ===== Detail endpoints =====

    pub fn get_detail(&self, brand_id: &str, item_id: &str) -> Option<&DetailEndpoint> {
        self.details.get(brand_id)?.get(item_id)
    }

    pub fn get_detail_mut(&mut self, brand_id: &str, item_id: &str) -> Option<&mut DetailEndpoint> {
        self.details.get_mut(brand_id)?.get_mut(item_id)
    }

    /// Folds an item observation into the registry
    ///
    /// Creates the entry on first sight; later observations refresh its
    /// classification fields and move its timestamps forward.
    pub fn create_or_update_detail(
        &mut self,
        brand_id: &str,
        observation: &ItemObservation,
        observed_at: DateTime<Utc>,
    ) -> DetailUpsert {
        let items = self.details.entry(brand_id.to_string()).or_default();
        match items.get_mut(&observation.item_id) {
            Some(existing) => {
                existing.observe(observation, observed_at);
                DetailUpsert::Updated
            }
            None => {
                items.insert(
                    observation.item_id.clone(),
                    DetailEndpoint::from_observation(observation, observed_at),
                );
                DetailUpsert::Created
            }
        }
    }

    /// Removes one detail endpoint, or all of a brand's when `item_id` is `None`
    ///
    /// Returns the number of entries removed.
    pub fn delete_detail(&mut self, brand_id: &str, item_id: Option<&str>) -> usize {
        match item_id {
            None => self.details.remove(brand_id).map_or(0, |items| items.len()),
            Some(item_id) => {
                let Some(items) = self.details.get_mut(brand_id) else {
                    return 0;
                };
                let removed = usize::from(items.remove(item_id).is_some());
                if items.is_empty() {
                    self.details.remove(brand_id);
                }
                removed
            }
        }
    }

    pub fn details(&self) -> &DetailMap {
        &self.details
    }

    pub fn detail_count(&self) -> usize {
        self.details.values().map(BTreeMap::len).sum()
    }

    fn refresh_from_mirror(&self, path: &Path) {
        let (Some(mirror), Some(file_name)) = (&self.mirror, file_name(path)) else {
            return;
        };
        match mirror.pull(file_name, path) {
            Ok(true) => tracing::debug!("Refreshed {} from mirror", path.display()),
            Ok(false) => tracing::info!("No mirrored copy of {}", file_name),
            Err(e) => tracing::warn!(
                "Failed to refresh {} from mirror, using local copy: {}",
                file_name,
                e
            ),
        }
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

fn read_registry_file<T: DeserializeOwned>(path: &Path) -> RegistryResult<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("Registry file {} not found, starting empty", path.display());
            return Ok(None);
        }
        Err(source) => {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| RegistryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes through a sibling temporary file so a crash never truncates the registry
fn write_registry_file(path: &Path, value: &Value) -> RegistryResult<()> {
    let io_error = |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let contents = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).map_err(io_error)?;
    fs::rename(&tmp, path).map_err(io_error)?;
    Ok(())
}

/// Renames the neutral classification key on every detail entry
fn rename_classification(details: &mut Value, key: &str) {
    let Some(brands) = details.as_object_mut() else {
        return;
    };
    for entry in brands
        .values_mut()
        .filter_map(Value::as_object_mut)
        .flat_map(|items| items.values_mut())
        .filter_map(Value::as_object_mut)
    {
        if let Some(value) = entry.remove(CATEGORY_FIELD) {
            entry.insert(key.to_string(), value);
        }
    }
}
