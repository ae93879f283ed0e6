use crate::config::PipelineConfig;
use crate::models::{FileEvent, PipelineRun, RunState, Stage, file_name_of};
use crate::services::staging::{StagingArea, StagingError};
use crate::services::storage::{StorageError, StorageService};
use crate::services::transform::{DropIncompleteRows, Transform, TransformError};
use crate::utils::retry::{RetryPolicy, retry_transient};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Transform task aborted: {0}")]
    TransformTask(String),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

struct StageFailure {
    stage: Stage,
    error: PipelineError,
}

fn at<E: Into<PipelineError>>(stage: Stage) -> impl FnOnce(E) -> StageFailure {
    move |e| StageFailure {
        stage,
        error: e.into(),
    }
}

/// Drives one file through read, filter, stage, upload, archive and cleanup.
///
/// A single instance is shared by every concurrent run; all per-file state
/// lives in the [`PipelineRun`] owned by the task executing it.
pub struct IngestionPipeline {
    storage: Arc<dyn StorageService>,
    staging: StagingArea,
    transform: Arc<dyn Transform>,
    key_prefix: String,
    retry: RetryPolicy,
}

impl IngestionPipeline {
    pub fn new(storage: Arc<dyn StorageService>, staging: StagingArea) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            storage,
            staging,
            transform: Arc::new(DropIncompleteRows),
            key_prefix: defaults.key_prefix,
            retry: RetryPolicy::new(defaults.upload_max_attempts, defaults.upload_retry_backoff),
        }
    }

    pub fn from_config(config: &PipelineConfig, storage: Arc<dyn StorageService>) -> Self {
        let staging = StagingArea::new(&config.temp_dir, &config.archive_dir)
            .with_collision(config.archive_collision);

        Self::new(storage, staging)
            .with_key_prefix(config.key_prefix.clone())
            .with_retry(RetryPolicy::new(
                config.upload_max_attempts,
                config.upload_retry_backoff,
            ))
    }

    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// `<prefix>/<file name>`; files with the same name share a key
    pub fn remote_key(&self, source: &Path) -> String {
        let name = file_name_of(source).unwrap_or_default();
        if self.key_prefix.is_empty() {
            name
        } else {
            format!("{}/{}", self.key_prefix.trim_end_matches('/'), name)
        }
    }

    /// Executes a full run and returns its terminal record
    pub async fn run(&self, event: FileEvent) -> PipelineRun {
        let span = tracing::info_span!("ingest", file = %event.path.display());
        self.execute(event).instrument(span).await
    }

    async fn execute(&self, event: FileEvent) -> PipelineRun {
        let mut run = PipelineRun::new(&event, self.remote_key(&event.path));
        tracing::info!(
            file = %run.source_path.display(),
            stage = "detected",
            detected_at = %run.detected_at,
            "📄 New file"
        );

        if let Err(failure) = self.drive(&mut run).await {
            run.fail(failure.stage, failure.error.to_string());
            self.report_failure(&run, &failure.error);
        }

        run
    }

    async fn drive(&self, run: &mut PipelineRun) -> Result<(), StageFailure> {
        let raw = self
            .read_source(&run.source_path)
            .await
            .map_err(at(Stage::Read))?;
        Self::mark(run, Stage::Read);

        let filtered = self.apply_transform(raw).await.map_err(at(Stage::Filtered))?;
        Self::mark(run, Stage::Filtered);

        let staged = self
            .staging
            .stage(&run.source_path, &filtered)
            .await
            .map_err(at(Stage::Staged))?;
        run.staged_path = Some(staged.clone());
        Self::mark(run, Stage::Staged);

        self.upload(&staged, &run.remote_key)
            .await
            .map_err(at(Stage::Uploaded))?;
        Self::mark(run, Stage::Uploaded);

        let archived = self
            .staging
            .archive(&run.source_path)
            .await
            .map_err(at(Stage::Archived))?;
        run.archive_path = Some(archived);
        Self::mark(run, Stage::Archived);

        if let Err(e) = self.staging.cleanup(&staged).await {
            tracing::warn!(
                file = %run.source_path.display(),
                stage = %Stage::Cleaned,
                outcome = "warning",
                error = %e,
                "Staged file could not be removed"
            );
        }
        Self::mark(run, Stage::Cleaned);

        Ok(())
    }

    async fn read_source(&self, path: &Path) -> Result<Vec<u8>, PipelineError> {
        let read_err = |source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        };

        let metadata = tokio::fs::metadata(path).await.map_err(read_err)?;
        if !metadata.is_file() {
            return Err(PipelineError::NotAFile(path.to_path_buf()));
        }

        tokio::fs::read(path).await.map_err(read_err)
    }

    async fn apply_transform(&self, raw: Vec<u8>) -> Result<Vec<u8>, PipelineError> {
        let transform = self.transform.clone();
        let filtered = tokio::task::spawn_blocking(move || transform.apply(&raw))
            .await
            .map_err(|e| PipelineError::TransformTask(e.to_string()))??;
        Ok(filtered)
    }

    async fn upload(&self, staged: &Path, key: &str) -> Result<(), PipelineError> {
        let body = tokio::fs::read(staged)
            .await
            .map_err(|source| PipelineError::Read {
                path: staged.to_path_buf(),
                source,
            })?;

        retry_transient("upload", self.retry, || {
            self.storage.upload_file(key, body.clone())
        })
        .await?;

        Ok(())
    }

    fn mark(run: &mut PipelineRun, stage: Stage) {
        if run.advance(stage) {
            tracing::info!(
                file = %run.source_path.display(),
                stage = %stage,
                outcome = "ok",
                "Stage complete"
            );
        }
    }

    fn report_failure(&self, run: &PipelineRun, error: &PipelineError) {
        let RunState::Failed { stage, .. } = run.state() else {
            return;
        };

        tracing::error!(
            file = %run.source_path.display(),
            stage = %stage,
            outcome = "failed",
            error = %error,
            "❌ Run failed"
        );

        match stage {
            Stage::Uploaded => {
                if let Some(staged) = &run.staged_path {
                    tracing::warn!(
                        staged = %staged.display(),
                        "Staged file kept for manual recovery"
                    );
                }
            }
            Stage::Archived => {
                // The object is already in the bucket while the source stays put.
                tracing::error!(
                    remote_key = %run.remote_key,
                    source = %run.source_path.display(),
                    staged = ?run.staged_path,
                    "Remote object written but source not archived"
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingStorage {
        uploads: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl StorageService for RecordingStorage {
        async fn upload_file(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
            self.uploads.lock().unwrap().push((key.to_string(), data));
            Ok(())
        }
        async fn get_file(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound(key.to_string()))
        }
        async fn delete_file(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn list_objects(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Ok(vec![])
        }
        async fn file_exists(&self, _key: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
    }

    fn pipeline(root: &TempDir, storage: Arc<RecordingStorage>) -> IngestionPipeline {
        let staging = StagingArea::new(root.path().join("temp"), root.path().join("archive"));
        IngestionPipeline::new(storage, staging).with_retry(RetryPolicy::none())
    }

    #[test]
    fn test_remote_key() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline(&root, Arc::new(RecordingStorage::default()));
        assert_eq!(
            pipeline.remote_key(Path::new("/data/source/a.csv")),
            "processed/a.csv"
        );
        assert_eq!(
            pipeline
                .with_key_prefix("")
                .remote_key(Path::new("/data/source/a.csv")),
            "a.csv"
        );
    }

    #[tokio::test]
    async fn test_missing_source_fails_at_read() {
        let root = TempDir::new().unwrap();
        let storage = Arc::new(RecordingStorage::default());
        let pipeline = pipeline(&root, storage.clone());

        let run = pipeline
            .run(FileEvent::new(root.path().join("nope.csv")))
            .await;

        assert_eq!(run.failed_at(), Some(Stage::Read));
        assert!(storage.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_source_fails_at_read() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("folder.csv");
        std::fs::create_dir(&dir).unwrap();
        let pipeline = pipeline(&root, Arc::new(RecordingStorage::default()));

        let run = pipeline.run(FileEvent::new(&dir)).await;

        assert_eq!(run.failed_at(), Some(Stage::Read));
        match run.state() {
            RunState::Failed { cause, .. } => assert!(cause.contains("not a regular file")),
            other => panic!("unexpected state {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_csv_fails_at_filter() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("bad.csv");
        std::fs::write(&source, b"id,val\n1,2,3\n").unwrap();
        let storage = Arc::new(RecordingStorage::default());
        let pipeline = pipeline(&root, storage.clone());

        let run = pipeline.run(FileEvent::new(&source)).await;

        assert_eq!(run.failed_at(), Some(Stage::Filtered));
        assert!(run.staged_path.is_none());
        assert!(source.exists());
        assert!(storage.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_run_reaches_cleaned() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("a.csv");
        std::fs::write(&source, b"id,val\n1,5\n2,\n3,9\n").unwrap();
        let storage = Arc::new(RecordingStorage::default());
        let pipeline = pipeline(&root, storage.clone());

        let run = pipeline.run(FileEvent::new(&source)).await;

        assert!(run.is_cleaned(), "state: {}", run.state());
        let uploads = storage.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "processed/a.csv");
        assert_eq!(uploads[0].1, b"id,val\n1,5\n3,9\n");
        assert_eq!(run.archive_path, Some(root.path().join("archive").join("a.csv")));
        assert!(!root.path().join("temp").join("a.csv").exists());
    }
}
