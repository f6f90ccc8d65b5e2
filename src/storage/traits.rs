//! Storage traits and error types
//!
//! This module defines the remote mirror interface used by the registry and
//! the errors raised while loading or saving registry files.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or saving the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to access registry file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize registry: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised by a remote mirror
///
/// The registry logs these and carries on; they never fail a load or save.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Mirror IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mirror unavailable: {0}")]
    Unavailable(String),
}

/// Result type for mirror operations
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Remote copy of the registry files
///
/// Implementations must be usable from any category run at once.
pub trait RegistryMirror: std::fmt::Debug + Send + Sync {
    /// Copies the remote `file_name` over `local_path`
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The remote file existed and was copied
    /// * `Ok(false)` - There is no remote copy yet
    /// * `Err(MirrorError)` - The mirror could not be read
    fn pull(&self, file_name: &str, local_path: &Path) -> MirrorResult<bool>;

    /// Uploads `local_path` as the remote `file_name`
    fn push(&self, local_path: &Path, file_name: &str) -> MirrorResult<()>;
}
