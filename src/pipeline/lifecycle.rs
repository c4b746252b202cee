//! Worker startup and shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::types::Stage;

use super::Pipeline;

impl Pipeline {
    /// Spawn the configured number of consumers for every stage
    ///
    /// Consumers are named `{prefix}-{pid}-{stage}-{n}` so several processes can share
    /// one database without colliding.
    pub async fn start_workers(&self) -> Result<()> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let worker = &self.config.worker;
        let mut handles = self.workers.handles.lock().await;

        for (stage, count) in [
            (Stage::Chunking, worker.chunk_workers),
            (Stage::Analysis, worker.analysis_workers),
            (Stage::Graph, worker.graph_workers),
        ] {
            for _ in 0..count {
                let n = self.workers.next_consumer.fetch_add(1, Ordering::Relaxed);
                let consumer = format!(
                    "{}-{}-{}-{}",
                    worker.consumer_prefix,
                    std::process::id(),
                    stage,
                    n
                );
                let pipeline = self.clone();
                let cancel = self.workers.shutdown.child_token();

                handles.push(tokio::spawn(async move {
                    pipeline.run_consumer(stage, consumer, cancel).await;
                }));
            }
        }

        tracing::info!(
            chunk_workers = worker.chunk_workers,
            analysis_workers = worker.analysis_workers,
            graph_workers = worker.graph_workers,
            "Workers started"
        );
        Ok(())
    }

    /// Whether new jobs and workers are accepted
    pub fn is_accepting(&self) -> bool {
        self.workers.accepting_new.load(Ordering::SeqCst)
    }

    /// Gracefully shut down the pipeline
    ///
    /// 1. Stops accepting new jobs
    /// 2. Cancels every consumer (in-flight units finish, the rest stay queued)
    /// 3. Waits for consumers up to the configured shutdown timeout
    /// 4. Marks a clean shutdown and closes the database
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.workers.accepting_new.store(false, Ordering::SeqCst);
        self.workers.shutdown.cancel();

        let handles: Vec<_> = self.workers.handles.lock().await.drain(..).collect();
        let active = handles.len();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let timeout = self.config.worker.shutdown_timeout;

        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    tracing::warn!(panicked, "Some consumers ended abnormally");
                }
                tracing::info!(consumers = active, "All consumers stopped");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Timeout waiting for consumers, aborting them"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        self.db.close().await;
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
