use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

/// A file-creation notification that passed the watcher's filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            detected_at: Utc::now(),
        }
    }
}

/// One step of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Read,
    Filtered,
    Staged,
    Uploaded,
    Archived,
    Cleaned,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::Filtered => "filtered",
            Stage::Staged => "staged",
            Stage::Uploaded => "uploaded",
            Stage::Archived => "archived",
            Stage::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Detected,
    Reached(Stage),
    Failed { stage: Stage, cause: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Reached(Stage::Cleaned) | RunState::Failed { .. }
        )
    }

    /// Stage this state sits at; `None` while only detected
    fn stage(&self) -> Option<Stage> {
        match self {
            RunState::Detected => None,
            RunState::Reached(stage) | RunState::Failed { stage, .. } => Some(*stage),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Detected => f.write_str("detected"),
            RunState::Reached(stage) => write!(f, "{}", stage),
            RunState::Failed { stage, cause } => write!(f, "failed({}): {}", stage, cause),
        }
    }
}

/// Bookkeeping for a single file moving through the pipeline.
///
/// State only moves forward. Once terminal, further transitions are ignored.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub source_path: PathBuf,
    pub staged_path: Option<PathBuf>,
    pub remote_key: String,
    pub archive_path: Option<PathBuf>,
    pub detected_at: DateTime<Utc>,
    state: RunState,
}

impl PipelineRun {
    pub fn new(event: &FileEvent, remote_key: String) -> Self {
        Self {
            source_path: event.path.clone(),
            staged_path: None,
            remote_key,
            archive_path: None,
            detected_at: event.detected_at,
            state: RunState::Detected,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.source_path).unwrap_or_default()
    }

    /// Moves to `stage`. Returns false when the move would go backwards or
    /// the run is already terminal.
    pub fn advance(&mut self, stage: Stage) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if let Some(current) = self.state.stage()
            && stage <= current
        {
            return false;
        }
        self.state = RunState::Reached(stage);
        true
    }

    pub fn fail(&mut self, stage: Stage, cause: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = RunState::Failed {
            stage,
            cause: cause.into(),
        };
    }

    pub fn failed_at(&self) -> Option<Stage> {
        match &self.state {
            RunState::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_cleaned(&self) -> bool {
        self.state == RunState::Reached(Stage::Cleaned)
    }
}

pub fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
