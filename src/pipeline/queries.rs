//! Read access to jobs, units, checkpoints and graphs.

use crate::error::{Error, Result};
use crate::types::{Checkpoint, JobId, JobInfo, JobStatus, Stage, UnitInfo};

use super::Pipeline;

impl Pipeline {
    /// Load one job
    pub async fn get_job(&self, job_id: JobId) -> Result<JobInfo> {
        self.registry.get(job_id).await
    }

    /// List jobs newest first, optionally filtered by status
    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<JobInfo>> {
        self.registry.list(status).await
    }

    /// Units of a job in index order
    pub async fn list_units(&self, job_id: JobId) -> Result<Vec<UnitInfo>> {
        // NotFound for unknown jobs rather than an empty list
        self.registry.row(job_id).await?;

        Ok(self
            .db
            .list_units(job_id)
            .await?
            .into_iter()
            .map(UnitInfo::from)
            .collect())
    }

    /// Checkpoint of a job's stage, if one was written
    pub async fn get_checkpoint(&self, job_id: JobId, stage: Stage) -> Result<Option<Checkpoint>> {
        self.registry.row(job_id).await?;
        self.db.get_checkpoint(job_id, stage).await
    }

    /// Stored character graph of a job
    pub async fn get_graph(&self, job_id: JobId) -> Result<serde_json::Value> {
        self.registry.row(job_id).await?;
        self.db
            .get_graph(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("graph of job {}", job_id)))
    }
}
