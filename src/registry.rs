//! Job registry: durable job records and the job state machine
//!
//! Every status write goes through [`JobRegistry::transition`], which checks that the
//! requesting [`Actor`] owns the edge and then applies it with compare-and-set on the
//! status the caller observed. Two writers racing for the same edge cannot both win.

use std::sync::Arc;

use crate::db::{Database, JobRow, StatusUpdate};
use crate::error::{Error, Result};
use crate::types::{Actor, JobId, JobInfo, JobStatus};

/// Job records plus owned, compare-and-set status transitions
#[derive(Clone)]
pub struct JobRegistry {
    db: Arc<Database>,
}

impl JobRegistry {
    /// Wrap the pipeline database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a job in `created`
    pub async fn create(&self, source_ref: &str) -> Result<JobInfo> {
        let source_ref = source_ref.trim();
        if source_ref.is_empty() {
            return Err(Error::Validation("source_ref must not be empty".into()));
        }

        let id = self.db.insert_job(source_ref).await?;
        tracing::info!(job_id = %id, source_ref, "Created job");
        self.get(id).await
    }

    /// Load a job, failing with `NotFound` if it does not exist
    pub async fn get(&self, id: JobId) -> Result<JobInfo> {
        Ok(self.row(id).await?.into())
    }

    /// Raw job record, failing with `NotFound` if it does not exist
    pub async fn row(&self, id: JobId) -> Result<JobRow> {
        self.db
            .get_job(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    /// List jobs newest first
    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<JobInfo>> {
        Ok(self
            .db
            .list_jobs(status)
            .await?
            .into_iter()
            .map(JobInfo::from)
            .collect())
    }

    /// Move `job_id` from `from` to `to` on behalf of `actor`
    pub async fn transition(
        &self,
        job_id: JobId,
        actor: Actor,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<()> {
        self.transition_with(job_id, actor, from, to, StatusUpdate::default())
            .await
    }

    /// [`transition`](Self::transition) that also writes a status note or failure reason
    ///
    /// Fails with [`Error::InvalidTransition`] if `actor` does not own the edge, or if
    /// the job's status is no longer `from` (the error then reports the actual status).
    pub async fn transition_with(
        &self,
        job_id: JobId,
        actor: Actor,
        from: JobStatus,
        to: JobStatus,
        update: StatusUpdate<'_>,
    ) -> Result<()> {
        if JobStatus::owner_of(from, to) != Some(actor) {
            tracing::warn!(
                job_id = %job_id,
                %from,
                %to,
                %actor,
                "Rejected status write not owned by actor"
            );
            return Err(Error::InvalidTransition {
                job_id,
                from,
                to,
                actor,
            });
        }

        if self
            .db
            .compare_and_set_status(job_id, from, to, update)
            .await?
        {
            tracing::info!(job_id = %job_id, %from, %to, %actor, "Job status changed");
            return Ok(());
        }

        let current = self.row(job_id).await?.status;
        tracing::debug!(
            job_id = %job_id,
            expected = %from,
            %current,
            %to,
            %actor,
            "Lost status compare-and-set"
        );
        Err(Error::InvalidTransition {
            job_id,
            from: current,
            to,
            actor,
        })
    }
}
