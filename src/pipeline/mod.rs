//! The pipeline: stage workers over the stream queue, split into focused submodules.
//!
//! The `Pipeline` struct and its methods are organized by domain:
//! - [`intake`] - Job creation and upload confirmation
//! - [`chunking`] - Splitting an uploaded source into units
//! - [`analysis`] - Per-unit analysis, checkpointed resume and reconciliation
//! - [`graph`] - Character graph generation
//! - [`consumer`] - Consumer-group loops feeding the stage handlers
//! - [`control`] - Operator resubmission and abandonment
//! - [`queries`] - Read access for the API and CLI
//! - [`lifecycle`] - Worker startup and graceful shutdown

mod analysis;
mod chunking;
mod consumer;
mod control;
mod graph;
mod intake;
mod lifecycle;
mod queries;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use analysis::{AnalysisRun, UnitOutcome};

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize};

use tokio_util::sync::CancellationToken;

use crate::analysis::{Analyzer, HttpAnalyzer};
use crate::broadcast::{Observer, ProgressBroadcaster};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::queue::{SqliteStreamQueue, StreamQueue};
use crate::registry::JobRegistry;
use crate::source::{FsSourceStore, SourceStore};
use crate::types::{JobId, JobStatus, ProgressEvent, Stage, UnitEvent};

/// Worker task bookkeeping
#[derive(Clone)]
pub(crate) struct WorkerState {
    /// Cancelled once on shutdown; every consumer loop watches a child of it
    pub(crate) shutdown: CancellationToken,
    /// Flag to indicate whether new jobs are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Spawned consumer tasks
    pub(crate) handles: Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
    /// Numbering for consumer names
    pub(crate) next_consumer: Arc<AtomicUsize>,
}

/// Main pipeline instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Pipeline {
    /// Database instance for persistence
    /// Public for integration tests to inspect unit and checkpoint state
    pub db: Arc<Database>,
    /// Job records and owned status transitions
    pub(crate) registry: JobRegistry,
    /// Stage streams
    pub(crate) queue: Arc<dyn StreamQueue>,
    /// Uploaded sources
    pub(crate) sources: Arc<dyn SourceStore>,
    /// Per-unit analysis operation
    pub(crate) analyzer: Arc<dyn Analyzer>,
    /// Live progress fanout
    pub(crate) broadcaster: ProgressBroadcaster,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Consumer tasks and shutdown coordination
    pub(crate) workers: WorkerState,
}

impl Pipeline {
    /// Create a pipeline that analyzes units through the configured HTTP endpoint
    ///
    /// Opens the database (running migrations), creates every stage's consumer group and
    /// wires the filesystem source store. Workers are not started; see
    /// [`start_workers`](Self::start_workers).
    pub async fn new(config: Config) -> Result<Self> {
        let analyzer = HttpAnalyzer::new(&config.analysis)?;
        Self::with_analyzer(config, Arc::new(analyzer)).await
    }

    /// Create a pipeline around a caller-supplied [`Analyzer`]
    pub async fn with_analyzer(config: Config, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        config.validate()?;

        let db = Database::open(&config.persistence).await?;

        if db.was_unclean_shutdown().await? {
            tracing::warn!(
                "Previous run did not shut down cleanly; in-flight entries will be reclaimed after the claim timeout"
            );
        }
        db.set_clean_start().await?;

        let queue = SqliteStreamQueue::from_database(&db, &config.queue);
        for stage in Stage::ALL {
            queue.ensure_group(stage.stream(), stage.group()).await?;
        }

        tracing::info!(
            analyzer = analyzer.name(),
            database = %config.persistence.database_path.display(),
            sources = %config.sources.root_dir.display(),
            "Pipeline initialized"
        );

        let db = Arc::new(db);
        Ok(Self {
            registry: JobRegistry::new(db.clone()),
            db,
            queue: Arc::new(queue),
            sources: Arc::new(FsSourceStore::from_config(&config.sources)),
            analyzer,
            broadcaster: ProgressBroadcaster::from_config(&config.broadcast),
            config: Arc::new(config),
            workers: WorkerState {
                shutdown: CancellationToken::new(),
                accepting_new: Arc::new(AtomicBool::new(true)),
                handles: Arc::new(tokio::sync::Mutex::new(Vec::new())),
                next_consumer: Arc::new(AtomicUsize::new(0)),
            },
        })
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Job registry used by every stage
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Stream queue the stages consume from
    pub fn queue(&self) -> Arc<dyn StreamQueue> {
        Arc::clone(&self.queue)
    }

    /// Progress broadcaster
    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    /// Observe live progress of one job
    ///
    /// The stream ends after the job settles. Nothing is replayed: an observer only sees
    /// events published after it subscribed.
    pub fn subscribe(&self, job_id: JobId) -> Observer {
        self.broadcaster.subscribe(job_id)
    }

    /// Publish a progress event to the job's observers
    pub(crate) fn emit(&self, event: ProgressEvent) {
        self.broadcaster.publish(event);
    }

    /// Publish a job-level event carrying the stored counters
    pub(crate) async fn emit_job(&self, job_id: JobId, status: JobStatus, message: &str) {
        let (processed, total) = match self.db.get_job(job_id).await {
            Ok(Some(row)) => (row.processed_units, row.total_units),
            Ok(None) => (0, 0),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to load counters for progress event");
                (0, 0)
            }
        };
        self.emit(ProgressEvent::job(job_id, status, processed, total, message));
    }

    /// Publish a per-unit event
    pub(crate) fn emit_unit(
        &self,
        job_id: JobId,
        (processed, total): (i64, i64),
        unit_event: UnitEvent,
        message: &str,
    ) {
        self.emit(
            ProgressEvent::job(job_id, JobStatus::Analyzing, processed, total, message)
                .with_unit(unit_event),
        );
    }

    /// Run a persistence write under the configured deadline
    pub(crate) async fn persist<T, F>(&self, operation: &str, write: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.config.worker.persistence_timeout;
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| Error::Timeout {
                operation: operation.to_string(),
                timeout,
            })?
    }

    /// Token cancelled when [`shutdown`](Self::shutdown) begins
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.workers.shutdown.clone()
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let pipeline = Arc::new(self.clone());
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(pipeline, config).await })
    }
}
