pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::PipelineConfig;
use crate::services::pipeline::IngestionPipeline;
use crate::services::scheduler::{ProcessingScheduler, SchedulerHandle};
use crate::services::storage::StorageService;
use std::sync::Arc;

/// Wires a pipeline and its scheduler from configuration.
///
/// The returned handle is what the directory watcher submits events to.
pub fn create_scheduler(
    config: &PipelineConfig,
    storage: Arc<dyn StorageService>,
) -> (ProcessingScheduler, SchedulerHandle) {
    let pipeline = Arc::new(IngestionPipeline::from_config(config, storage));
    let (scheduler, handle) = ProcessingScheduler::new(pipeline);
    (
        scheduler
            .with_shutdown_timeout(config.shutdown_timeout)
            .with_settle_delay(config.settle_delay),
        handle,
    )
}
