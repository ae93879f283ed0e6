use crate::config::normalize_suffix;
use crate::models::FileEvent;
use crate::services::scheduler::SchedulerHandle;
use notify::event::CreateKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};

/// Decides which notifications become [`FileEvent`]s.
///
/// Pure path inspection only: no filesystem access happens here, since it runs
/// on the notification thread.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    suffix: String,
}

impl WatchFilter {
    pub fn new(suffix: &str) -> Self {
        Self {
            suffix: normalize_suffix(suffix),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.suffix))
            .unwrap_or(false)
    }

    /// Create notifications for matching files; everything else yields nothing.
    ///
    /// Only `CreateKind::Folder` is known to be a directory. Backends that
    /// report `Any` or `Other` give no file type, so a directory named
    /// `x.csv` passes here and the run stops at the read stage, which rejects
    /// anything that is not a regular file.
    pub fn events_for(&self, event: &Event) -> Vec<FileEvent> {
        match event.kind {
            EventKind::Create(CreateKind::Folder) => Vec::new(),
            EventKind::Create(_) => event
                .paths
                .iter()
                .filter(|path| self.matches(path))
                .map(FileEvent::new)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Watches one directory, non-recursively, and forwards matching
/// file-creation events to the scheduler.
///
/// Notifications arrive on the backend's own thread. Dropping the watcher
/// stops them.
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    dir: PathBuf,
}

impl DirectoryWatcher {
    pub fn start(dir: &Path, suffix: &str, scheduler: SchedulerHandle) -> notify::Result<Self> {
        let filter = WatchFilter::new(suffix);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for file_event in filter.events_for(&event) {
                        tracing::debug!(file = %file_event.path.display(), "Create event");
                        if let Err(e) = scheduler.submit(file_event) {
                            tracing::warn!(file = %e.0.path.display(), "Dropped event: {}", e);
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {}", e),
            }
        })?;

        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        tracing::info!("👀 Watching {} for *.{} files", dir.display(), normalize_suffix(suffix));

        Ok(Self {
            watcher,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stops delivering notifications
    pub fn stop(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.dir) {
            tracing::warn!("Failed to unwatch {}: {}", self.dir.display(), e);
        }
        tracing::info!("🛑 Stopped watching {}", self.dir.display());
    }
}
