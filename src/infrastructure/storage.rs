use crate::config::StorageConfig;
use crate::services::storage::{S3StorageService, StorageError};
use aws_sdk_s3::config::{Credentials, Region};
use aws_smithy_http_client::tls::{self, TlsContext, TrustStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Rejects a configured CA bundle that is not an existing file.
///
/// Runs before the client is built, so a bad path never reaches the network.
pub fn validate_ca_bundle(config: &StorageConfig) -> Result<(), StorageError> {
    match &config.ca_bundle_path {
        Some(path) if !path.as_os_str().is_empty() && !path.is_file() => Err(
            StorageError::Config(format!("CA bundle file {} does not exist", path.display())),
        ),
        _ => Ok(()),
    }
}

fn ca_tls_context(path: &Path) -> Result<TlsContext, StorageError> {
    let pem = std::fs::read(path)?;
    let trust_store = TrustStore::empty()
        .with_native_roots(false)
        .with_pem_certificate(pem.as_slice());

    TlsContext::builder()
        .with_trust_store(trust_store)
        .build()
        .map_err(|e| StorageError::Config(format!("Invalid CA bundle {}: {}", path.display(), e)))
}

/// Builds the S3 client for one bucket. No request is sent.
pub async fn build_storage(config: &StorageConfig) -> Result<S3StorageService, StorageError> {
    validate_ca_bundle(config)?;

    let mut loader = aws_config::from_env()
        .endpoint_url(config.endpoint.trim())
        .region(Region::new(config.region.clone()))
        .credentials_provider(Credentials::new(
            config.access_key_id.clone(),
            config.secret_key.clone(),
            None,
            None,
            "static",
        ));

    if let Some(path) = config
        .ca_bundle_path
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
    {
        info!("🔐 Using CA bundle: {}", path.display());
        let http_client = aws_smithy_http_client::Builder::new()
            .tls_provider(tls::Provider::Rustls(
                tls::rustls_provider::CryptoMode::Ring,
            ))
            .tls_context(ca_tls_context(path)?)
            .build_https();
        loader = loader.http_client(http_client);
    }

    let aws_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    Ok(S3StorageService::new(s3_client, config.bucket.clone()))
}

pub async fn setup_storage(config: &StorageConfig) -> Result<Arc<S3StorageService>, StorageError> {
    info!(
        "☁️  S3 Storage: {} (Bucket: {}, Region: {})",
        config.endpoint, config.bucket, config.region
    );

    let storage = build_storage(config).await?;

    match storage.bucket_ready().await {
        Ok(()) => info!("✅ Bucket '{}' is ready", config.bucket),
        Err(e) => warn!("⚠️  Bucket '{}' is not reachable yet: {}", config.bucket, e),
    }

    Ok(Arc::new(storage))
}
