//! Job records: creation, compare-and-set status writes, counters and graph storage.

use crate::error::DatabaseError;
use crate::types::{JobId, JobStatus};
use crate::{Error, Result};

use super::{Database, JobRow};

const JOB_COLUMNS: &str = r#"
    id, source_ref, object_key, status, status_message,
    total_units, processed_units, failed_units, error_message,
    created_at, updated_at
"#;

/// Optional fields written together with a status change
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusUpdate<'a> {
    /// Human-readable note replacing the previous one
    pub message: Option<&'a str>,
    /// Failure reason; cleared when `None`
    pub error: Option<&'a str>,
}

impl Database {
    /// Insert a new job in `created`
    pub async fn insert_job(&self, source_ref: &str) -> Result<JobId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (source_ref, status, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(source_ref)
        .bind(JobStatus::Created)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert job: {}",
                e
            )))
        })?;

        Ok(JobId(result.last_insert_rowid()))
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: JobId) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get job: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List jobs, newest first, optionally restricted to one status
    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<JobRow>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, JobRow>(&format!(
                    "SELECT {} FROM jobs WHERE status = ? ORDER BY created_at DESC, id DESC",
                    JOB_COLUMNS
                ))
                .bind(status)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, JobRow>(&format!(
                    "SELECT {} FROM jobs ORDER BY created_at DESC, id DESC",
                    JOB_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list jobs: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Move a job from `from` to `to` only if its status is still `from`
    ///
    /// Returns `false` when another writer changed the status first (or the job is gone).
    pub async fn compare_and_set_status(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: StatusUpdate<'_>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, status_message = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to)
        .bind(update.message)
        .bind(update.error)
        .bind(now)
        .bind(id)
        .bind(from)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update job status: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the object key of the uploaded source
    pub async fn set_object_key(&self, id: JobId, object_key: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query("UPDATE jobs SET object_key = ?, updated_at = ? WHERE id = ?")
            .bind(object_key)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set object key: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "job {}",
                id
            ))));
        }

        Ok(())
    }

    /// Set the unit total after chunking and recount processed units
    pub async fn set_total_units(&self, id: JobId, total: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE jobs
            SET total_units = ?1,
                processed_units = (
                    SELECT COUNT(*) FROM units WHERE job_id = ?3 AND status IN (2, 3)
                ),
                failed_units = (
                    SELECT COUNT(*) FROM units WHERE job_id = ?3 AND status = 3
                ),
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(total)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_check_violation(&e) {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "job {}: processed units would exceed total {}",
                    id, total
                )))
            } else {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set unit total: {}",
                    e
                )))
            }
        })?;

        Ok(())
    }

    /// Recompute processed/failed counters from the unit table
    ///
    /// Returns `(processed, total)` after the refresh.
    pub async fn refresh_unit_counts(&self, id: JobId) -> Result<(i64, i64)> {
        let now = chrono::Utc::now().timestamp();

        let counts: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET processed_units = (
                    SELECT COUNT(*) FROM units WHERE job_id = ?2 AND status IN (2, 3)
                ),
                failed_units = (
                    SELECT COUNT(*) FROM units WHERE job_id = ?2 AND status = 3
                ),
                updated_at = ?1
            WHERE id = ?2
            RETURNING processed_units, total_units
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_check_violation(&e) {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "job {}: processed units would exceed total",
                    id
                )))
            } else {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to refresh unit counts: {}",
                    e
                )))
            }
        })?;

        counts.ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("job {}", id))))
    }

    /// Store the generated graph as JSON
    pub async fn store_graph(&self, id: JobId, graph: &serde_json::Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let json = serde_json::to_string(graph)?;

        sqlx::query("UPDATE jobs SET graph_json = ?, updated_at = ? WHERE id = ?")
            .bind(json)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to store graph: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Load the generated graph, if any
    pub async fn get_graph(&self, id: JobId) -> Result<Option<serde_json::Value>> {
        let json: Option<Option<String>> =
            sqlx::query_scalar("SELECT graph_json FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get graph: {}",
                        e
                    )))
                })?;

        match json.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn is_check_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_check_violation())
}
