use crate::config::ArchiveCollision;
use crate::models::file_name_of;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Path has no file name: {0}")]
    NoFileName(PathBuf),

    #[error("Archive already contains {0}")]
    ArchiveCollision(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StagingError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StagingError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Local bookkeeping around a run: the temp directory holding transformed
/// files and the archive directory receiving processed originals.
#[derive(Debug, Clone)]
pub struct StagingArea {
    temp_dir: PathBuf,
    archive_dir: PathBuf,
    collision: ArchiveCollision,
}

impl StagingArea {
    pub fn new(temp_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            archive_dir: archive_dir.into(),
            collision: ArchiveCollision::default(),
        }
    }

    pub fn with_collision(mut self, collision: ArchiveCollision) -> Self {
        self.collision = collision;
        self
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub async fn ensure_dirs(&self) -> Result<(), StagingError> {
        for dir in [&self.temp_dir, &self.archive_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StagingError::io(dir, e))?;
        }
        Ok(())
    }

    /// Writes `data` to `<temp_dir>/<source file name>`
    pub async fn stage(&self, source: &Path, data: &[u8]) -> Result<PathBuf, StagingError> {
        let name = file_name_of(source).ok_or_else(|| StagingError::NoFileName(source.into()))?;

        fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| StagingError::io(&self.temp_dir, e))?;

        let staged = self.temp_dir.join(name);
        fs::write(&staged, data)
            .await
            .map_err(|e| StagingError::io(&staged, e))?;

        Ok(staged)
    }

    /// Moves the source file into the archive, keeping its name
    pub async fn archive(&self, source: &Path) -> Result<PathBuf, StagingError> {
        let name = file_name_of(source).ok_or_else(|| StagingError::NoFileName(source.into()))?;

        fs::create_dir_all(&self.archive_dir)
            .await
            .map_err(|e| StagingError::io(&self.archive_dir, e))?;

        let target = self.archive_dir.join(name);

        match self.collision {
            ArchiveCollision::Fail => move_exclusive(source, &target).await?,
            ArchiveCollision::Overwrite => {
                if fs::try_exists(&target).await.unwrap_or(false) {
                    tracing::warn!(target = %target.display(), "Overwriting archived file");
                }
                move_replacing(source, &target).await?;
            }
        }

        Ok(target)
    }

    /// Removes a staged file. An already missing file is fine.
    pub async fn cleanup(&self, staged: &Path) -> Result<(), StagingError> {
        match fs::remove_file(staged).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagingError::io(staged, e)),
        }
    }
}

/// Moves `source` to `target` without ever replacing an existing `target`.
///
/// The hard link is created atomically, so a file that appears at `target`
/// after any earlier check still wins. Filesystems without hard links, or a
/// target on another device, fall back to an exclusive-create copy.
async fn move_exclusive(source: &Path, target: &Path) -> Result<(), StagingError> {
    match fs::hard_link(source, target).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(StagingError::ArchiveCollision(target.to_path_buf()));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(StagingError::io(source, e)),
        Err(_) => copy_exclusive(source, target).await?,
    }

    fs::remove_file(source)
        .await
        .map_err(|e| StagingError::io(source, e))
}

async fn copy_exclusive(source: &Path, target: &Path) -> Result<(), StagingError> {
    let mut reader = fs::File::open(source)
        .await
        .map_err(|e| StagingError::io(source, e))?;

    let mut writer = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(StagingError::ArchiveCollision(target.to_path_buf()));
        }
        Err(e) => return Err(StagingError::io(target, e)),
    };

    let copied = async {
        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await
    }
    .await;

    if let Err(e) = copied {
        // Only this call created the partial file
        let _ = fs::remove_file(target).await;
        return Err(StagingError::io(target, e));
    }
    Ok(())
}

async fn move_replacing(source: &Path, target: &Path) -> Result<(), StagingError> {
    match fs::rename(source, target).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            fs::copy(source, target)
                .await
                .map_err(|e| StagingError::io(target, e))?;
            fs::remove_file(source)
                .await
                .map_err(|e| StagingError::io(source, e))
        }
        Err(e) => Err(StagingError::io(source, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn area(root: &TempDir) -> StagingArea {
        StagingArea::new(root.path().join("temp"), root.path().join("archive"))
    }

    #[tokio::test]
    async fn test_stage_creates_temp_dir() {
        let root = TempDir::new().unwrap();
        let staging = area(&root);

        let staged = staging
            .stage(Path::new("/somewhere/a.csv"), b"id\n1\n")
            .await
            .unwrap();

        assert_eq!(staged, root.path().join("temp").join("a.csv"));
        assert_eq!(std::fs::read(&staged).unwrap(), b"id\n1\n");
    }

    #[tokio::test]
    async fn test_archive_moves_file() {
        let root = TempDir::new().unwrap();
        let staging = area(&root);
        let source = root.path().join("a.csv");
        std::fs::write(&source, b"x").unwrap();

        let archived = staging.archive(&source).await.unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read(archived).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_archive_collision_fails_by_default() {
        let root = TempDir::new().unwrap();
        let staging = area(&root);
        staging.ensure_dirs().await.unwrap();

        let source = root.path().join("a.csv");
        std::fs::write(&source, b"new").unwrap();
        std::fs::write(root.path().join("archive").join("a.csv"), b"old").unwrap();

        let err = staging.archive(&source).await.unwrap_err();
        assert!(matches!(err, StagingError::ArchiveCollision(_)));
        assert!(source.exists());
        assert_eq!(
            std::fs::read(root.path().join("archive").join("a.csv")).unwrap(),
            b"old"
        );
    }

    #[tokio::test]
    async fn test_archive_collision_overwrite() {
        let root = TempDir::new().unwrap();
        let staging = area(&root).with_collision(ArchiveCollision::Overwrite);
        staging.ensure_dirs().await.unwrap();

        let source = root.path().join("a.csv");
        std::fs::write(&source, b"new").unwrap();
        std::fs::write(root.path().join("archive").join("a.csv"), b"old").unwrap();

        let archived = staging.archive(&source).await.unwrap();
        assert_eq!(std::fs::read(archived).unwrap(), b"new");
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_cleanup_missing_file_is_ok() {
        let root = TempDir::new().unwrap();
        let staging = area(&root);
        assert!(staging.cleanup(&root.path().join("gone.csv")).await.is_ok());
    }

    #[tokio::test]
    async fn test_exclusive_move_never_replaces_target() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("a.csv");
        let target = root.path().join("taken.csv");
        std::fs::write(&source, b"new").unwrap();
        std::fs::write(&target, b"old").unwrap();

        let err = move_exclusive(&source, &target).await.unwrap_err();

        assert!(matches!(err, StagingError::ArchiveCollision(_)));
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        assert_eq!(std::fs::read(&source).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_exclusive_copy_never_replaces_target() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("a.csv");
        let target = root.path().join("taken.csv");
        std::fs::write(&source, b"new").unwrap();
        std::fs::write(&target, b"old").unwrap();

        let err = copy_exclusive(&source, &target).await.unwrap_err();

        assert!(matches!(err, StagingError::ArchiveCollision(_)));
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_exclusive_copy_writes_new_target() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("a.csv");
        let target = root.path().join("copy.csv");
        std::fs::write(&source, b"id\n1\n").unwrap();

        copy_exclusive(&source, &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"id\n1\n");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_archive_missing_source_is_io_error() {
        let root = TempDir::new().unwrap();
        let staging = area(&root);

        let err = staging.archive(&root.path().join("gone.csv")).await.unwrap_err();
        assert!(matches!(err, StagingError::Io { .. }));
    }
}
