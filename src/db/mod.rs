//! Database layer for scene-pipeline
//!
//! Handles SQLite persistence for jobs, units, checkpoints and runtime state. The stream
//! queue tables live in the same database file but are driven by
//! [`SqliteStreamQueue`](crate::queue::SqliteStreamQueue).
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`jobs`] - Job records, compare-and-set status writes, counters, graph storage
//! - [`units`] - Unit rows, the durable per-unit result store
//! - [`checkpoints`] - Monotonic resume markers derived from unit results
//! - [`state`] - Runtime state (shutdown tracking)

use crate::types::{Checkpoint, JobId, JobInfo, JobStatus, UnitInfo, UnitStatus};
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod checkpoints;
mod jobs;
mod migrations;
mod state;
mod units;

pub use jobs::StatusUpdate;

/// Job record from database
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Unique database ID
    pub id: i64,
    /// Caller-supplied source reference
    pub source_ref: String,
    /// Object key of the uploaded source, set when the upload is confirmed
    pub object_key: Option<String>,
    /// Current status
    pub status: JobStatus,
    /// Last status note
    pub status_message: Option<String>,
    /// Units created by the splitter
    pub total_units: i64,
    /// Units in `done` or `error`
    pub processed_units: i64,
    /// Units in `error`
    pub failed_units: i64,
    /// Reason for a failed status
    pub error_message: Option<String>,
    /// Unix timestamp when the job was created
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl JobRow {
    /// Job id as a typed id
    pub fn job_id(&self) -> JobId {
        JobId(self.id)
    }
}

impl From<JobRow> for JobInfo {
    fn from(row: JobRow) -> Self {
        let progress = if row.total_units > 0 {
            (row.processed_units as f32 / row.total_units as f32) * 100.0
        } else if row.status == JobStatus::Completed {
            100.0
        } else {
            0.0
        };

        JobInfo {
            id: JobId(row.id),
            source_ref: row.source_ref,
            object_key: row.object_key,
            status: row.status,
            status_message: row.status_message,
            total_units: row.total_units,
            processed_units: row.processed_units,
            failed_units: row.failed_units,
            progress,
            error_message: row.error_message,
            created_at: timestamp(row.created_at),
            updated_at: timestamp(row.updated_at),
        }
    }
}

/// Unit record from database
#[derive(Debug, Clone, FromRow)]
pub struct UnitRow {
    /// Owning job
    pub job_id: i64,
    /// 0-based position in the source
    pub unit_index: i64,
    /// Splitter-assigned id
    pub id: String,
    /// Scene header or chunk title
    pub title: String,
    /// Unit text
    pub text: String,
    /// Unit status code (see [`UnitStatus`])
    pub status: i32,
    /// Failed attempts so far
    pub retries: i64,
    /// Last failure reason
    pub error_message: Option<String>,
    /// Analysis result as JSON text
    pub result_json: Option<String>,
}

impl UnitRow {
    /// Decoded unit status
    pub fn unit_status(&self) -> UnitStatus {
        UnitStatus::from_i32(self.status)
    }

    /// Parsed analysis result, if the unit has one
    pub fn result(&self) -> Option<serde_json::Value> {
        self.result_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

impl From<UnitRow> for UnitInfo {
    fn from(row: UnitRow) -> Self {
        let result = row.result();
        UnitInfo {
            status: row.unit_status(),
            id: row.id,
            index: row.unit_index,
            title: row.title,
            retries: row.retries,
            error_message: row.error_message,
            result,
        }
    }
}

/// Checkpoint record from database
#[derive(Debug, Clone, FromRow)]
pub struct CheckpointRow {
    /// `{job_id}:{stage}`
    pub key: String,
    /// Owning job
    pub job_id: i64,
    /// Stage name
    pub stage: String,
    /// Contiguous done prefix
    pub last_processed_index: i64,
    /// `{"lastProcessedIndex": n, "accumulatedResults": [...]}`
    pub data: String,
    /// Unix timestamp of the last advance
    pub updated_at: i64,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = serde_json::Error;

    fn try_from(row: CheckpointRow) -> std::result::Result<Self, Self::Error> {
        let data: CheckpointData = serde_json::from_str(&row.data)?;
        Ok(Checkpoint {
            job_id: JobId(row.job_id),
            stage: row.stage,
            last_processed_index: row.last_processed_index,
            accumulated_results: data.accumulated_results,
            updated_at: timestamp(row.updated_at),
        })
    }
}

/// JSON payload stored in `checkpoints.data`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CheckpointData {
    pub last_processed_index: i64,
    pub accumulated_results: Vec<serde_json::Value>,
}

fn timestamp(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Database handle for scene-pipeline
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
