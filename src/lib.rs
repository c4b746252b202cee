//! # scene-pipeline
//!
//! Resumable screenplay analysis pipeline.
//!
//! A submitted source is split into units, every unit is analyzed by an external
//! service, and the results are aggregated into a character co-occurrence graph.
//! Stages hand work to each other through durable streams with consumer groups, so any
//! number of workers (in one process or several) can share the load, and a crash loses
//! no acknowledged work.
//!
//! ## Design
//!
//! - **Durable** - jobs, units, checkpoints and streams live in one SQLite database
//! - **Resumable** - analysis restarts after the last checkpoint and skips stored results
//! - **Owned transitions** - every job status change is a compare-and-set by its owning stage
//! - **Observable** - per-job progress fanout, served over SSE by the REST API
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use scene_pipeline::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(Config::default()).await?;
//!     pipeline.start_workers().await?;
//!
//!     let job = pipeline
//!         .submit_text("pilot.txt", "INT. KITCHEN - NIGHT\n\nANNA\nWho's there?\n")
//!         .await?;
//!
//!     // Follow the job until it settles
//!     let mut progress = pipeline.subscribe(job.id);
//!     while let Some(event) = progress.next().await {
//!         println!("{}: {}/{}", event.status, event.processed_count, event.total_count);
//!     }
//!
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Unit analysis seam and HTTP implementation
pub mod analysis;
/// REST API module
pub mod api;
/// Per-job progress fanout
pub mod broadcast;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Character graph aggregation
pub mod graph;
/// Stage workers and job lifecycle (decomposed into focused submodules)
pub mod pipeline;
/// Durable stage streams with consumer groups
pub mod queue;
/// Job registry with owned status transitions
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Uploaded source storage
pub mod source;
/// Scene-aware source splitting
pub mod splitter;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use analysis::{AnalysisRequest, Analyzer, HttpAnalyzer};
pub use broadcast::{Observer, ProgressBroadcaster};
pub use config::Config;
pub use db::Database;
pub use error::{
    AnalysisError, ApiError, DatabaseError, Error, ErrorDetail, QueueError, Result, ToHttpStatus,
};
pub use graph::{CharacterGraph, build_character_graph};
pub use pipeline::Pipeline;
pub use queue::{SqliteStreamQueue, StreamMessage, StreamQueue};
pub use registry::JobRegistry;
pub use source::{FsSourceStore, SourceStore};
pub use splitter::{SplitUnit, split_units};
pub use types::{
    Checkpoint, JobId, JobInfo, JobStatus, ProgressEvent, Stage, UnitEvent, UnitInfo, UnitStatus,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use scene_pipeline::{Config, Pipeline, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = Pipeline::new(Config::default()).await?;
///     pipeline.start_workers().await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(pipeline).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(pipeline: Pipeline) -> Result<()> {
    wait_for_signal().await;
    pipeline.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
