//! Checkpoints: per-(job, stage) resume markers.
//!
//! The unit table is the single authority. A checkpoint is recomputed from it as the
//! contiguous prefix of `done` units, so it can only point at results that are already
//! durable, and the upsert refuses to move it backwards.

use crate::error::DatabaseError;
use crate::types::{Checkpoint, JobId, Stage, UnitStatus};
use crate::{Error, Result};

use super::{CheckpointData, CheckpointRow, Database};

fn checkpoint_key(job_id: JobId, stage: Stage) -> String {
    format!("{}:{}", job_id, stage.checkpoint_name())
}

impl Database {
    /// Load the checkpoint for `(job, stage)`
    pub async fn get_checkpoint(&self, job_id: JobId, stage: Stage) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT key, job_id, stage, last_processed_index, data, updated_at
            FROM checkpoints WHERE key = ?
            "#,
        )
        .bind(checkpoint_key(job_id, stage))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get checkpoint: {}",
                e
            )))
        })?;

        row.map(Checkpoint::try_from)
            .transpose()
            .map_err(Error::Serialization)
    }

    /// Highest index `i` such that units `0..=i` are all `done`
    ///
    /// `None` when unit 0 is not done yet (or the job has no units).
    pub async fn contiguous_done_prefix(&self, job_id: JobId) -> Result<Option<i64>> {
        let (first_open, last): (Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                MIN(CASE WHEN status != ? THEN unit_index END),
                MAX(unit_index)
            FROM units WHERE job_id = ?
            "#,
        )
        .bind(UnitStatus::Done.to_i32())
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to compute done prefix: {}",
                e
            )))
        })?;

        Ok(match (first_open, last) {
            (Some(0), _) | (None, None) => None,
            (Some(open), _) => Some(open - 1),
            (None, Some(last)) => Some(last),
        })
    }

    /// Recompute and store the checkpoint for `(job, stage)`
    ///
    /// Returns the new index when the checkpoint moved forward, `None` when it stayed put.
    pub async fn sync_checkpoint(&self, job_id: JobId, stage: Stage) -> Result<Option<i64>> {
        let Some(prefix) = self.contiguous_done_prefix(job_id).await? else {
            return Ok(None);
        };

        let accumulated_results = self
            .completed_results(job_id)
            .await?
            .into_iter()
            .take_while(|(index, _)| *index <= prefix)
            .map(|(_, result)| result)
            .collect();

        let data = serde_json::to_string(&CheckpointData {
            last_processed_index: prefix,
            accumulated_results,
        })?;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO checkpoints (key, job_id, stage, last_processed_index, data, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                last_processed_index = excluded.last_processed_index,
                data = excluded.data,
                updated_at = excluded.updated_at
            WHERE excluded.last_processed_index > checkpoints.last_processed_index
            "#,
        )
        .bind(checkpoint_key(job_id, stage))
        .bind(job_id)
        .bind(stage.checkpoint_name())
        .bind(prefix)
        .bind(data)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write checkpoint: {}",
                e
            )))
        })?;

        Ok((result.rows_affected() > 0).then_some(prefix))
    }
}
