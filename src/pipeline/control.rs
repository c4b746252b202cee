//! Operator actions on jobs sitting in a stage failure.

use crate::db::StatusUpdate;
use crate::error::{Error, Result};
use crate::queue::StreamMessage;
use crate::types::{Actor, JobId, JobInfo, JobStatus};

use super::Pipeline;

impl Pipeline {
    /// Re-run the failed stage of a job
    ///
    /// - `chunking_failed` goes back to `queued_for_chunking` with a new `chunk_source`
    /// - `analysis_failed` puts failed units back to pending, returns to
    ///   `queued_for_analysis` and enqueues `resume_analysis`, which starts after the
    ///   checkpoint and skips units that already have results
    /// - `graph_generation_failed` returns to `analysis_complete` with a new `generate_graph`
    pub async fn resubmit(&self, job_id: JobId) -> Result<JobInfo> {
        let row = self.registry.row(job_id).await?;
        let from = row.status;
        let Some(to) = from.resubmit_target() else {
            return Err(Error::Validation(format!(
                "job {} is {}; only chunking_failed, analysis_failed or graph_generation_failed jobs can be resubmitted",
                job_id, from
            )));
        };

        let message = match from {
            JobStatus::ChunkingFailed => {
                let object_key = row.object_key.clone().ok_or_else(|| {
                    Error::Validation(format!("job {} has no uploaded source", job_id))
                })?;
                StreamMessage::ChunkSource { job_id, object_key }
            }
            JobStatus::AnalysisFailed => StreamMessage::ResumeAnalysis { job_id },
            _ => StreamMessage::GenerateGraph { job_id },
        };

        self.registry
            .transition_with(
                job_id,
                Actor::Operator,
                from,
                to,
                StatusUpdate {
                    message: Some("resubmitted by operator"),
                    error: None,
                },
            )
            .await?;

        if from == JobStatus::AnalysisFailed {
            let reset = self.db.reset_failed_units(job_id).await?;
            self.db.refresh_unit_counts(job_id).await?;
            tracing::info!(job_id = %job_id, reset, "Failed units reset to pending");
        }

        self.queue.enqueue(&message).await?;
        tracing::info!(job_id = %job_id, %from, %to, kind = message.kind(), "Job resubmitted");

        self.emit_job(job_id, to, "resubmitted by operator").await;
        self.registry.get(job_id).await
    }

    /// Give up on a job sitting in a stage failure, moving it to `failed`
    pub async fn abandon(&self, job_id: JobId, reason: &str) -> Result<JobInfo> {
        let from = self.registry.row(job_id).await?.status;

        self.registry
            .transition_with(
                job_id,
                Actor::Operator,
                from,
                JobStatus::Failed,
                StatusUpdate {
                    message: Some("abandoned by operator"),
                    error: Some(reason),
                },
            )
            .await?;

        tracing::info!(job_id = %job_id, %from, reason, "Job abandoned");
        self.emit_job(job_id, JobStatus::Failed, reason).await;
        self.registry.get(job_id).await
    }
}
