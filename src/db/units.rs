//! Unit rows: the durable per-unit result store.
//!
//! Writes never demote a `done` unit, so a late or duplicated worker cannot undo a result
//! that is already persisted.

use crate::error::DatabaseError;
use crate::splitter::SplitUnit;
use crate::types::{JobId, UnitStatus};
use crate::{Error, Result};
use sqlx::QueryBuilder;
use std::time::Duration;

use super::{Database, UnitRow};

const UNIT_COLUMNS: &str = r#"
    job_id, unit_index, id, title, text, status, retries, error_message, result_json
"#;

/// Keeps each INSERT well under SQLite's bound-parameter limit
const INSERT_BATCH: usize = 500;

impl Database {
    /// Insert units produced by the splitter
    ///
    /// Idempotent: units that already exist for `(job, index)` are left untouched, so
    /// re-chunking a job never duplicates or resets units. Returns the number of new rows.
    pub async fn insert_units(&self, job_id: JobId, units: &[SplitUnit]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let mut inserted = 0;
        for batch in units.chunks(INSERT_BATCH) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO units (job_id, unit_index, id, title, text, status) ",
            );

            builder.push_values(batch, |mut b, unit| {
                b.push_bind(job_id)
                    .push_bind(unit.index as i64)
                    .push_bind(&unit.id)
                    .push_bind(&unit.title)
                    .push_bind(&unit.text)
                    .push_bind(UnitStatus::Pending.to_i32());
            });

            let result = builder.build().execute(&mut *tx).await.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert units: {}",
                    e
                )))
            })?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit units: {}",
                e
            )))
        })?;

        Ok(inserted)
    }

    /// Get one unit
    pub async fn get_unit(&self, job_id: JobId, index: i64) -> Result<Option<UnitRow>> {
        let row = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {} FROM units WHERE job_id = ? AND unit_index = ?",
            UNIT_COLUMNS
        ))
        .bind(job_id)
        .bind(index)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get unit: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all units of a job in index order
    pub async fn list_units(&self, job_id: JobId) -> Result<Vec<UnitRow>> {
        self.list_units_from(job_id, 0).await
    }

    /// List units with `unit_index >= start` in index order
    pub async fn list_units_from(&self, job_id: JobId, start: i64) -> Result<Vec<UnitRow>> {
        let rows = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {} FROM units WHERE job_id = ? AND unit_index >= ? ORDER BY unit_index",
            UNIT_COLUMNS
        ))
        .bind(job_id)
        .bind(start)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list units: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Mark a unit as being analyzed
    ///
    /// Returns `false` if the unit is already `done` (or does not exist), or if another
    /// worker marked it `processing` less than `in_flight_for` ago. A `processing` unit
    /// older than that belongs to a worker that died mid-call and is taken over.
    pub async fn mark_unit_processing(
        &self,
        job_id: JobId,
        index: i64,
        in_flight_for: Duration,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        // Whole seconds, rounded up so a sub-second window still covers the current second
        let window = i64::try_from(in_flight_for.as_secs())
            .unwrap_or(i64::MAX)
            .saturating_add(i64::from(in_flight_for.subsec_nanos() > 0))
            .max(1);

        let result = sqlx::query(
            r#"
            UPDATE units SET status = ?, started_at = ?
            WHERE job_id = ? AND unit_index = ? AND status != ?
              AND NOT (status = ? AND started_at IS NOT NULL AND started_at > ?)
            "#,
        )
        .bind(UnitStatus::Processing.to_i32())
        .bind(now)
        .bind(job_id)
        .bind(index)
        .bind(UnitStatus::Done.to_i32())
        .bind(UnitStatus::Processing.to_i32())
        .bind(now.saturating_sub(window))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark unit processing: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist a successful analysis result
    ///
    /// Returns `false` if another worker already stored a result for this unit.
    pub async fn complete_unit(
        &self,
        job_id: JobId,
        index: i64,
        result: &serde_json::Value,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let json = serde_json::to_string(result)?;

        let outcome = sqlx::query(
            r#"
            UPDATE units
            SET status = ?, result_json = ?, error_message = NULL, completed_at = ?
            WHERE job_id = ? AND unit_index = ? AND status != ?
            "#,
        )
        .bind(UnitStatus::Done.to_i32())
        .bind(json)
        .bind(now)
        .bind(job_id)
        .bind(index)
        .bind(UnitStatus::Done.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to store unit result: {}",
                e
            )))
        })?;

        Ok(outcome.rows_affected() > 0)
    }

    /// Persist a failed analysis attempt
    pub async fn fail_unit(&self, job_id: JobId, index: i64, message: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE units
            SET status = ?, retries = retries + 1, error_message = ?, completed_at = ?
            WHERE job_id = ? AND unit_index = ? AND status != ?
            "#,
        )
        .bind(UnitStatus::Error.to_i32())
        .bind(message)
        .bind(now)
        .bind(job_id)
        .bind(index)
        .bind(UnitStatus::Done.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to store unit error: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Put every `error` unit of a job back to `pending` for another attempt
    pub async fn reset_failed_units(&self, job_id: JobId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE units SET status = ?, completed_at = NULL
            WHERE job_id = ? AND status = ?
            "#,
        )
        .bind(UnitStatus::Pending.to_i32())
        .bind(job_id)
        .bind(UnitStatus::Error.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset failed units: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Count units per status as `(pending + processing, done, error)`
    pub async fn unit_status_counts(&self, job_id: JobId) -> Result<(i64, i64, i64)> {
        let counts: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status IN (0, 1) THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 3 THEN 1 ELSE 0 END), 0)
            FROM units WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count units: {}",
                e
            )))
        })?;

        Ok(counts)
    }

    /// Results of every `done` unit in index order
    pub async fn completed_results(&self, job_id: JobId) -> Result<Vec<(i64, serde_json::Value)>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT unit_index, result_json FROM units
            WHERE job_id = ? AND status = ? AND result_json IS NOT NULL
            ORDER BY unit_index
            "#,
        )
        .bind(job_id)
        .bind(UnitStatus::Done.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load unit results: {}",
                e
            )))
        })?;

        rows.into_iter()
            .map(|(index, json)| Ok((index, serde_json::from_str(&json)?)))
            .collect()
    }
}
