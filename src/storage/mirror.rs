//! Mounted-directory registry mirror
//!
//! Registry files are kept under a `registry/` prefix of the mirror root, so
//! the same bucket (or mount) can hold other artefacts alongside them.

use crate::storage::traits::{MirrorError, MirrorResult, RegistryMirror};
use std::fs;
use std::path::{Path, PathBuf};

/// Key prefix for registry files on the mirror
pub const MIRROR_PREFIX: &str = "registry";

/// Mirror backed by a locally mounted directory
#[derive(Debug, Clone)]
pub struct DirectoryMirror {
    root: PathBuf,
}

impl DirectoryMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of `file_name` on the mirror
    pub fn remote_path(&self, file_name: &str) -> PathBuf {
        self.root.join(MIRROR_PREFIX).join(file_name)
    }
}

impl RegistryMirror for DirectoryMirror {
    fn pull(&self, file_name: &str, local_path: &Path) -> MirrorResult<bool> {
        if !self.root.is_dir() {
            return Err(MirrorError::Unavailable(format!(
                "mirror root {} is not mounted",
                self.root.display()
            )));
        }

        let remote = self.remote_path(file_name);
        if !remote.is_file() {
            return Ok(false);
        }

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Stage beside the local file; a failed copy leaves the local copy intact
        let staged = local_path.with_extension("json.pull");
        if let Err(e) = fs::copy(&remote, &staged).and_then(|_| fs::rename(&staged, local_path)) {
            let _ = fs::remove_file(&staged);
            return Err(e.into());
        }
        Ok(true)
    }

    fn push(&self, local_path: &Path, file_name: &str) -> MirrorResult<()> {
        let remote = self.remote_path(file_name);
        if let Some(parent) = remote.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local_path, &remote)?;
        Ok(())
    }
}
