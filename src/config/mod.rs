use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Connection settings for the remote bucket
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub access_key_id: String,
    pub secret_key: String,

    /// Endpoint URL, trimmed of surrounding whitespace
    pub endpoint: String,

    /// Region name (default: "us-east-1")
    pub region: String,

    pub bucket: String,

    /// PEM bundle used as the TLS trust store. Must exist when set.
    pub ca_bundle_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_key: impl Into<String>,
        endpoint: impl AsRef<str>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_key: secret_key.into(),
            endpoint: endpoint.as_ref().trim().to_string(),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            ca_bundle_path: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_bundle_path = Some(path.into());
        self
    }

    /// Load storage settings from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |name: &'static str| env::var(name).map_err(|_| ConfigError::Missing(name));

        let mut config = Self::new(
            required("S3_ACCESS_KEY")?,
            required("S3_SECRET_KEY")?,
            required("S3_ENDPOINT")?,
            required("S3_BUCKET")?,
        );

        if let Ok(region) = env::var("S3_REGION") {
            config.region = region.trim().to_string();
        }

        config.ca_bundle_path = env::var("S3_CA_BUNDLE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}

/// What to do when the archive already holds a file with the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveCollision {
    /// Refuse to archive; the source file stays where it is
    #[default]
    Fail,
    /// Replace the archived copy (replay semantics)
    Overwrite,
}

impl std::str::FromStr for ArchiveCollision {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(ConfigError::Invalid {
                name: "ARCHIVE_ON_COLLISION",
                value: other.to_string(),
            }),
        }
    }
}

/// Local layout and run policy for the ingestion pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Watched directory (default: "./data/source")
    pub source_dir: PathBuf,

    /// Destination for processed originals (default: "./data/archive")
    pub archive_dir: PathBuf,

    /// Staging area for transformed files (default: "./data/temp")
    pub temp_dir: PathBuf,

    /// File extension to react to, without the dot (default: "csv")
    pub suffix: String,

    /// Remote key prefix (default: "processed")
    pub key_prefix: String,

    /// Total upload attempts including the first (default: 3)
    pub upload_max_attempts: u32,

    /// Initial retry delay, doubled on each attempt (default: 500 ms)
    pub upload_retry_backoff: Duration,

    /// How long shutdown waits for in-flight runs (default: 30 s)
    pub shutdown_timeout: Duration,

    /// Pause between detection and reading, so writers can finish (default: 250 ms)
    pub settle_delay: Duration,

    pub archive_collision: ArchiveCollision,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("./data/source"),
            archive_dir: PathBuf::from("./data/archive"),
            temp_dir: PathBuf::from("./data/temp"),
            suffix: "csv".to_string(),
            key_prefix: "processed".to_string(),
            upload_max_attempts: 3,
            upload_retry_backoff: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(250),
            archive_collision: ArchiveCollision::Fail,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();

        Ok(Self {
            source_dir: env::var("SOURCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.source_dir),

            archive_dir: env::var("ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.archive_dir),

            temp_dir: env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.temp_dir),

            suffix: env::var("WATCH_SUFFIX")
                .map(|v| normalize_suffix(&v))
                .unwrap_or(default.suffix),

            key_prefix: env::var("REMOTE_KEY_PREFIX")
                .map(|v| v.trim_matches('/').to_string())
                .unwrap_or(default.key_prefix),

            upload_max_attempts: env::var("UPLOAD_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(default.upload_max_attempts),

            upload_retry_backoff: env::var("UPLOAD_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.upload_retry_backoff),

            shutdown_timeout: env::var("SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.shutdown_timeout),

            settle_delay: env::var("SETTLE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.settle_delay),

            archive_collision: match env::var("ARCHIVE_ON_COLLISION") {
                Ok(v) => v.parse()?,
                Err(_) => default.archive_collision,
            },
        })
    }
}

/// Strips a leading dot and lowercases, so ".CSV" and "csv" compare equal
pub fn normalize_suffix(suffix: &str) -> String {
    suffix.trim().trim_start_matches('.').to_lowercase()
}
