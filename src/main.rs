use anyhow::Context;
use clap::Parser;
use csv_ingest::config::{PipelineConfig, StorageConfig, normalize_suffix};
use csv_ingest::create_scheduler;
use csv_ingest::infrastructure::storage;
use csv_ingest::services::staging::StagingArea;
use csv_ingest::services::watcher::DirectoryWatcher;
use dotenvy::dotenv;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to watch for new files (overrides SOURCE_DIR)
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Where processed originals are moved (overrides ARCHIVE_DIR)
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Staging directory for transformed files (overrides TEMP_DIR)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// File extension to react to (overrides WATCH_SUFFIX)
    #[arg(long)]
    suffix: Option<String>,
}

impl Args {
    fn apply(self, config: &mut PipelineConfig) {
        if let Some(dir) = self.source_dir {
            config.source_dir = dir;
        }
        if let Some(dir) = self.archive_dir {
            config.archive_dir = dir;
        }
        if let Some(dir) = self.temp_dir {
            config.temp_dir = dir;
        }
        if let Some(suffix) = self.suffix {
            config.suffix = normalize_suffix(&suffix);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "csv_ingest=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & Logging
    dotenv().ok();
    let args = Args::parse();
    init_tracing();

    info!("🚀 Starting CSV ingestion service...");

    // 2. Configuration
    let storage_config = StorageConfig::from_env().context("Invalid storage configuration")?;
    let mut config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    args.apply(&mut config);

    info!(
        "⚙️  Pipeline Config: source={}, archive={}, temp={}, suffix={}, attempts={}",
        config.source_dir.display(),
        config.archive_dir.display(),
        config.temp_dir.display(),
        config.suffix,
        config.upload_max_attempts
    );

    // 3. Infrastructure (fails before any file is touched)
    let storage_service = storage::setup_storage(&storage_config).await?;

    tokio::fs::create_dir_all(&config.source_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.source_dir.display()))?;
    StagingArea::new(&config.temp_dir, &config.archive_dir)
        .ensure_dirs()
        .await?;

    // 4. Scheduler
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (scheduler, handle) = create_scheduler(&config, storage_service);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    // 5. Watcher
    let watcher = DirectoryWatcher::start(&config.source_dir, &config.suffix, handle)
        .with_context(|| format!("Failed to watch {}", config.source_dir.display()))?;

    // 6. Wait for Shutdown Signal
    shutdown_signal().await;

    info!("🛑 Shutting down ingestion service...");
    watcher.stop();
    let _ = shutdown_tx.send(true);

    match scheduler_task.await {
        Ok(report) if report.abandoned.is_empty() => {
            info!(
                "👋 Exited cleanly after {} runs ({} duplicates dropped)",
                report.dispatched, report.rejected
            );
        }
        Ok(report) => {
            error!(
                "❌ {} runs were abandoned at shutdown",
                report.abandoned.len()
            );
        }
        Err(e) => error!("❌ Scheduler task failed: {}", e),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
