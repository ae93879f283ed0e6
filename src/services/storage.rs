use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use thiserror::Error;

/// Error codes S3-compatible stores use for throttling or temporary faults
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "InternalError",
    "ServiceUnavailable",
    "Throttling",
];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage service error {code} (HTTP {status}): {message}")]
    Service {
        code: String,
        status: u16,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request could not be built: {0}")]
    Request(String),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether a retry has a reasonable chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Transport(_) => true,
            StorageError::Service { code, status, .. } => {
                *status >= 500 || *status == 429 || TRANSIENT_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Classifies an error response from the service.
    ///
    /// Only a missing object is `NotFound`. A missing bucket also answers 404
    /// but carries `NoSuchBucket`, and stays a `Service` error. HEAD responses
    /// have no body, so a bare 404 without a code counts as a missing object.
    pub fn from_service(key: &str, status: u16, code: Option<&str>, message: Option<&str>) -> Self {
        match code {
            Some("NoSuchKey" | "NotFound") => StorageError::NotFound(key.to_string()),
            None if status == 404 => StorageError::NotFound(key.to_string()),
            _ => StorageError::Service {
                code: code.unwrap_or("Unknown").to_string(),
                status,
                message: message.unwrap_or_default().to_string(),
            },
        }
    }

    /// Maps an SDK failure onto the error kinds callers branch on
    pub fn from_sdk<E>(key: &str, err: SdkError<E, HttpResponse>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        match err {
            SdkError::ServiceError(ctx) => Self::from_service(
                key,
                ctx.raw().status().as_u16(),
                ctx.err().code(),
                ctx.err().message(),
            ),
            err @ (SdkError::TimeoutError(_)
            | SdkError::DispatchFailure(_)
            | SdkError::ResponseError(_)) => {
                StorageError::Transport(DisplayErrorContext(&err).to_string())
            }
            other => StorageError::Request(DisplayErrorContext(&other).to_string()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Object storage bound to one bucket.
///
/// Implementations keep no per-run state, so a single instance is shared by
/// every concurrent run.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates or overwrites the object at `key`
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> StorageResult<()>;
    async fn get_file(&self, key: &str) -> StorageResult<Vec<u8>>;
    /// Succeeds when the key is already absent
    async fn delete_file(&self, key: &str) -> StorageResult<()>;
    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>>;
    async fn file_exists(&self, key: &str) -> StorageResult<bool>;

    async fn list(&self) -> StorageResult<Vec<String>> {
        self.list_objects("").await
    }

    /// Fetches `key` into `local_target`, creating parent directories
    async fn download_to(&self, key: &str, local_target: &Path) -> StorageResult<()> {
        let body = self.get_file(key).await?;
        if let Some(parent) = local_target.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_target, body).await?;
        tracing::info!(key = %key, target = %local_target.display(), "Object downloaded");
        Ok(())
    }
}

pub struct S3StorageService {
    client: Client,
    bucket: String,
}

impl S3StorageService {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Cheap reachability probe used at startup
    pub async fn bucket_ready(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk(&self.bucket, e))?;
        Ok(())
    }
}

#[async_trait]
impl StorageService for S3StorageService {
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::from_sdk(key, e))?;

        tracing::debug!(bucket = %self.bucket, key = %key, size, "Object uploaded");
        Ok(())
    }

    async fn get_file(&self, key: &str) -> StorageResult<Vec<u8>> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk(key, e))?;

        let data = res
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?
            .to_vec();
        Ok(data)
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        let res = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res.map_err(|e| StorageError::from_sdk(key, e)) {
            Ok(_) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let res = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token)
                .send()
                .await
                .map_err(|e| StorageError::from_sdk(prefix, e))?;

            if let Some(contents) = res.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        objects.push(key);
                    }
                }
            }

            if res.is_truncated.unwrap_or(false) && res.next_continuation_token.is_some() {
                continuation_token = res.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(objects)
    }

    async fn file_exists(&self, key: &str) -> StorageResult<bool> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res.map_err(|e| StorageError::from_sdk(key, e)) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
