//! Upload/notify boundary: job creation and upload confirmation.

use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::queue::StreamMessage;
use crate::types::{Actor, JobId, JobInfo, JobStatus};

use super::Pipeline;

impl Pipeline {
    fn ensure_accepting(&self) -> Result<()> {
        if self.workers.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    /// Register a new job in `created`
    pub async fn create_job(&self, source_ref: &str) -> Result<JobInfo> {
        self.ensure_accepting()?;
        self.registry.create(source_ref).await
    }

    /// Record that the client started uploading the source
    pub async fn mark_uploading(&self, job_id: JobId) -> Result<JobInfo> {
        self.registry
            .transition(job_id, Actor::Intake, JobStatus::Created, JobStatus::Uploading)
            .await?;
        self.registry.get(job_id).await
    }

    /// Confirm that the source is stored under `object_key` and queue it for chunking
    ///
    /// The job must be `created` or `uploading`; anything else is
    /// [`Error::InvalidTransition`].
    pub async fn confirm_upload(&self, job_id: JobId, object_key: &str) -> Result<JobInfo> {
        self.ensure_accepting()?;

        let object_key = object_key.trim();
        if object_key.is_empty() {
            return Err(Error::Validation("object_key must not be empty".into()));
        }

        let from = self.registry.row(job_id).await?.status;
        if !matches!(from, JobStatus::Created | JobStatus::Uploading) {
            return Err(Error::InvalidTransition {
                job_id,
                from,
                to: JobStatus::Uploaded,
                actor: Actor::Intake,
            });
        }

        self.db.set_object_key(job_id, object_key).await?;
        self.registry
            .transition(job_id, Actor::Intake, from, JobStatus::Uploaded)
            .await?;
        self.registry
            .transition(
                job_id,
                Actor::Intake,
                JobStatus::Uploaded,
                JobStatus::QueuedForChunking,
            )
            .await?;

        let entry_id = self
            .queue
            .enqueue(&StreamMessage::ChunkSource {
                job_id,
                object_key: object_key.to_string(),
            })
            .await?;

        tracing::info!(job_id = %job_id, object_key, entry_id, "Upload confirmed, queued for chunking");
        self.emit_job(job_id, JobStatus::QueuedForChunking, "queued for chunking")
            .await;

        self.registry.get(job_id).await
    }

    /// Store `text` as a new job's source and queue it, in one call
    ///
    /// The source lands under `jobs/{job_id}/source.txt` in the source store.
    pub async fn submit_text(&self, source_ref: &str, text: &str) -> Result<JobInfo> {
        let job = self.create_job(source_ref).await?;
        let object_key = format!("jobs/{}/source.txt", job.id);

        self.mark_uploading(job.id).await?;
        self.sources.put(&object_key, text).await?;
        self.confirm_upload(job.id, &object_key).await
    }
}
