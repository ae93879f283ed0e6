#![allow(dead_code)]

use async_trait::async_trait;
use csv_ingest::services::storage::{StorageError, StorageResult, StorageService};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Failure injected into the next upload attempt
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Transient,
    Permanent,
}

impl Fault {
    fn error(self) -> StorageError {
        match self {
            Fault::Transient => StorageError::Service {
                code: "SlowDown".into(),
                status: 503,
                message: "Please reduce your request rate".into(),
            },
            Fault::Permanent => StorageError::Service {
                code: "AccessDenied".into(),
                status: 403,
                message: "Access Denied".into(),
            },
        }
    }
}

/// Bucket kept in memory
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    faults: Mutex<VecDeque<Fault>>,
    gate: Option<Semaphore>,
    upload_attempts: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads wait until [`MemoryStorage::open_gate`] is called
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn fail_next_uploads(&self, faults: impl IntoIterator<Item = Fault>) {
        self.faults.lock().unwrap().extend(faults);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    /// Polls until at least `n` uploads have started
    pub async fn wait_for_attempts(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.upload_attempts() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("upload never started");
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        let fault = self.faults.lock().unwrap().pop_front();
        if let Some(fault) = fault {
            return Err(fault.error());
        }

        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn get_file(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.object(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn file_exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}

/// source/, archive/ and temp/ under one temp root
pub struct Dirs {
    pub root: tempfile::TempDir,
}

impl Dirs {
    pub fn new() -> Self {
        let root = tempfile::TempDir::new().unwrap();
        for dir in ["source", "archive", "temp"] {
            std::fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        Self { root }
    }

    pub fn source(&self) -> std::path::PathBuf {
        self.root.path().join("source")
    }

    pub fn archive(&self) -> std::path::PathBuf {
        self.root.path().join("archive")
    }

    pub fn temp(&self) -> std::path::PathBuf {
        self.root.path().join("temp")
    }

    pub fn config(&self) -> csv_ingest::config::PipelineConfig {
        csv_ingest::config::PipelineConfig {
            source_dir: self.source(),
            archive_dir: self.archive(),
            temp_dir: self.temp(),
            upload_retry_backoff: Duration::from_millis(1),
            settle_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn write_source(&self, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = self.source().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}
