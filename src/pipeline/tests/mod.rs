mod chunking;
mod lifecycle;
mod progress;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::test_helpers::*;
use super::*;
use crate::error::Error;
use crate::queue::{SqliteStreamQueue, StreamMessage};
use crate::types::{JobId, JobStatus, Stage, UnitStatus};

/// Submit a screenplay and run the chunking stage, leaving the job queued for analysis
async fn chunked_job(pipeline: &Pipeline, scenes: usize) -> JobId {
    let job = pipeline
        .submit_text("pilot.txt", &screenplay(scenes))
        .await
        .unwrap();
    assert_eq!(drain_stage(pipeline, Stage::Chunking).await, 1);
    assert_eq!(
        pipeline.get_job(job.id).await.unwrap().status,
        JobStatus::QueuedForAnalysis
    );
    job.id
}

/// Queue handle with raw publish and dead-letter inspection
fn raw_queue(pipeline: &Pipeline) -> SqliteStreamQueue {
    SqliteStreamQueue::from_database(&pipeline.db, &pipeline.config.queue)
}
