//! Transient files for pipeline runs
//!
//! Every run works inside its own directory under the scratch root. The
//! directory is a [`tempfile::TempDir`], removed when dropped, so nothing
//! survives a run however it ends.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use crate::Result;

/// Default age after which leftovers are purged
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Root directory for per-run scratch space
#[derive(Debug, Clone)]
pub struct Scratch {
    root: PathBuf,
}

/// Number of entries and bytes under the scratch root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScratchUsage {
    pub entries: usize,
    pub bytes: u64,
}

impl Scratch {
    /// Use `root` for scratch space, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory for one pipeline run
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn run_dir(&self) -> Result<TempDir> {
        let dir = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&self.root)?;
        Ok(dir)
    }

    /// Remove entries under the root last modified more than `max_age` ago
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns error if the root cannot be listed
    pub fn purge_stale(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.root)? {
            let Ok(entry) = entry else { continue };
            let Ok(meta) = entry.metadata() else { continue };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age <= max_age {
                continue;
            }

            let path = entry.path();
            let result = if meta.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to purge scratch entry");
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "purged stale scratch entries");
        }
        Ok(removed)
    }

    /// Count entries and total bytes under the root
    ///
    /// # Errors
    ///
    /// Returns error if the root cannot be listed
    pub fn usage(&self) -> Result<ScratchUsage> {
        let mut usage = ScratchUsage::default();
        for entry in std::fs::read_dir(&self.root)? {
            let Ok(entry) = entry else { continue };
            usage.entries += 1;
            usage.bytes += dir_size(&entry.path());
        }
        Ok(usage)
    }
}

fn dir_size(path: &Path) -> u64 {
    let Ok(meta) = std::fs::metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return meta.len();
    }
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .map(|e| dir_size(&e.path()))
                .sum()
        })
        .unwrap_or(0)
}
