use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The set of source paths with an active run.
///
/// Claiming a path that is already present fails instead of waiting, so a
/// duplicate notification is dropped rather than queued behind the first run.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    paths: Arc<DashMap<PathBuf, ()>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `path` for one run. The claim is released when the guard drops.
    pub fn try_claim(&self, path: &Path) -> Option<InFlightGuard> {
        match self.paths.entry(path.to_path_buf()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightGuard {
                    paths: self.paths.clone(),
                    path: path.to_path_buf(),
                })
            }
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.paths.iter().map(|e| e.key().clone()).collect()
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    paths: Arc<DashMap<PathBuf, ()>>,
    path: PathBuf,
}

impl InFlightGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.paths.remove(&self.path);
    }
}

/// Resolves symlinks and relative segments so one file maps to one key.
/// Falls back to the given path when the file can no longer be resolved.
pub async fn canonical_key(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}
