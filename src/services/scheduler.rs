use crate::models::{FileEvent, PipelineRun};
use crate::services::pipeline::IngestionPipeline;
use crate::utils::inflight::{InFlightRegistry, canonical_key};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::task::TaskTracker;

#[derive(Error, Debug)]
#[error("Scheduler is no longer accepting events")]
pub struct SubmitError(pub FileEvent);

/// Sending side of the scheduler queue.
///
/// Safe to call from any thread, including ones outside the tokio runtime.
/// `submit` never blocks.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<FileEvent>,
}

impl SchedulerHandle {
    pub fn submit(&self, event: FileEvent) -> Result<(), SubmitError> {
        self.tx.send(event).map_err(|e| SubmitError(e.0))
    }
}

#[derive(Debug, Default)]
pub struct SchedulerReport {
    pub dispatched: usize,
    /// Events dropped because a run for the same path was active
    pub rejected: usize,
    /// Events still queued when shutdown was signalled
    pub skipped: usize,
    /// Paths whose runs outlived the shutdown timeout
    pub abandoned: Vec<PathBuf>,
}

/// Receives file events and runs each one as its own task.
///
/// At most one run per canonical source path is active at a time; a second
/// event for a busy path is logged and dropped.
pub struct ProcessingScheduler {
    pipeline: Arc<IngestionPipeline>,
    registry: InFlightRegistry,
    tracker: TaskTracker,
    rx: mpsc::UnboundedReceiver<FileEvent>,
    outcomes: Option<mpsc::UnboundedSender<PipelineRun>>,
    shutdown_timeout: Duration,
    settle_delay: Duration,
    report: SchedulerReport,
}

impl ProcessingScheduler {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            pipeline,
            registry: InFlightRegistry::new(),
            tracker: TaskTracker::new(),
            rx,
            outcomes: None,
            shutdown_timeout: Duration::from_secs(30),
            settle_delay: Duration::ZERO,
            report: SchedulerReport::default(),
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Every terminal run is also sent here
    pub fn with_outcomes(mut self, outcomes: mpsc::UnboundedSender<PipelineRun>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Delay each run after its event is accepted
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn registry(&self) -> InFlightRegistry {
        self.registry.clone()
    }

    /// Dispatch loop. Ends when `shutdown` flips or every handle is dropped,
    /// then waits up to the shutdown timeout for in-flight runs.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SchedulerReport {
        tracing::info!("🚀 Processing scheduler started");

        loop {
            tokio::select! {
                maybe_event = self.rx.recv() => match maybe_event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain().await
    }

    async fn dispatch(&mut self, event: FileEvent) {
        let key = canonical_key(&event.path).await;

        let Some(guard) = self.registry.try_claim(&key) else {
            self.report.rejected += 1;
            tracing::warn!(
                file = %event.path.display(),
                "⏭️  Run already in flight for this path, dropping duplicate event"
            );
            return;
        };

        self.report.dispatched += 1;
        let pipeline = self.pipeline.clone();
        let outcomes = self.outcomes.clone();
        let settle_delay = self.settle_delay;

        self.tracker.spawn(async move {
            if !settle_delay.is_zero() {
                tokio::time::sleep(settle_delay).await;
            }
            let run = pipeline.run(event).await;
            drop(guard);
            if let Some(outcomes) = outcomes {
                let _ = outcomes.send(run);
            }
        });
    }

    async fn drain(mut self) -> SchedulerReport {
        tracing::info!("🛑 Scheduler stopping, no new runs will start");

        self.rx.close();
        while let Ok(event) = self.rx.try_recv() {
            self.report.skipped += 1;
            tracing::warn!(file = %event.path.display(), "Skipping event queued at shutdown");
        }

        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            tracing::info!(
                in_flight,
                timeout_secs = self.shutdown_timeout.as_secs(),
                "⏳ Waiting for in-flight runs"
            );
        }

        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            self.report.abandoned = self.registry.snapshot();
            for path in &self.report.abandoned {
                tracing::error!(file = %path.display(), "Run abandoned at shutdown");
            }
        }

        tracing::info!(
            dispatched = self.report.dispatched,
            rejected = self.report.rejected,
            skipped = self.report.skipped,
            abandoned = self.report.abandoned.len(),
            "✅ Scheduler stopped"
        );
        self.report
    }
}
