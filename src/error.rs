//! Error types for scene-pipeline
//!
//! One top-level [`Error`] with domain sub-enums for the stores the pipeline talks to:
//! - [`DatabaseError`] for registry, unit and checkpoint persistence
//! - [`QueueError`] for stream setup, publish, read and message decoding
//! - [`AnalysisError`] for the external analysis call
//!
//! Every error maps onto an HTTP status and a machine-readable code through [`ToHttpStatus`],
//! and converts into the JSON body [`ApiError`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::{Actor, JobId, JobStatus};

/// Result type alias for scene-pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for scene-pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the problem
        message: String,
        /// The configuration key that caused the error (e.g., "splitter.max_unit_tokens")
        key: Option<String>,
    },

    /// Bad job or unit input
    #[error("validation error: {0}")]
    Validation(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Stream queue failure
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// External analysis call failed
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// The splitter could not process the source
    #[error("chunking error: {0}")]
    Chunking(String),

    /// A stage tried to write a status transition it does not own, or lost the race for it
    #[error("job {job_id}: {actor} cannot move status from {from} to {to}")]
    InvalidTransition {
        /// Job whose status was being written
        job_id: JobId,
        /// Status observed when the write was attempted
        from: JobStatus,
        /// Requested status
        to: JobStatus,
        /// Stage that attempted the write
        actor: Actor,
    },

    /// A blocking operation exceeded its deadline
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// The deadline that expired
        timeout: Duration,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job, unit or source not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., processed units exceeding total units)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Stream queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Creating a stream or consumer group failed for a reason other than "already exists"
    #[error("failed to set up group {group} on {stream}: {reason}")]
    SetupFailed {
        /// Stream name
        stream: String,
        /// Consumer group name
        group: String,
        /// Underlying cause
        reason: String,
    },

    /// Read or claim against a group that was never created
    #[error("consumer group {group} does not exist on {stream}")]
    GroupNotFound {
        /// Stream name
        stream: String,
        /// Consumer group name
        group: String,
    },

    /// Appending to a stream failed
    #[error("failed to publish to {stream}: {reason}")]
    PublishFailed {
        /// Stream name
        stream: String,
        /// Underlying cause
        reason: String,
    },

    /// Reading or claiming entries failed
    #[error("failed to read from {stream}: {reason}")]
    ReadFailed {
        /// Stream name
        stream: String,
        /// Underlying cause
        reason: String,
    },

    /// Acknowledging or dead-lettering an entry failed
    #[error("failed to acknowledge entry {entry_id} on {stream}: {reason}")]
    AckFailed {
        /// Stream name
        stream: String,
        /// Entry id
        entry_id: i64,
        /// Underlying cause
        reason: String,
    },

    /// A pending entry was taken over by another consumer of the group
    #[error("entry {entry_id} on {stream} was claimed by another consumer")]
    ClaimLost {
        /// Stream name
        stream: String,
        /// Entry id
        entry_id: i64,
    },

    /// Payload is not a recognizable message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Payload carries a schema version this build does not read
    #[error("unsupported message schema version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the payload
        found: u64,
        /// Version this build reads
        expected: u32,
    },
}

/// External analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The call did not finish within its deadline
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),

    /// The service is temporarily unavailable (429, 5xx, connection refused)
    #[error("analysis service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request
    #[error("analysis rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status returned by the service
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// The service answered with something that is not a result
    #[error("invalid analysis response: {0}")]
    InvalidResponse(String),

    /// Transport-level failure
    #[error("analysis transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Any other failure reported by an analyzer implementation
    #[error("{0}")]
    Failed(String),
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "invalid_transition",
///     "message": "job 7: intake cannot move status from chunking to queued_for_chunking",
///     "details": { "job_id": 7, "current_status": "chunking" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context (job id, statuses, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::Validation(_) => 400,
            Error::Queue(QueueError::InvalidMessage(_))
            | Error::Queue(QueueError::UnsupportedVersion { .. }) => 422,
            Error::Chunking(_) => 422,

            Error::NotFound(_) => 404,
            Error::Database(DatabaseError::NotFound(_)) => 404,

            Error::InvalidTransition { .. } => 409,
            Error::Database(DatabaseError::ConstraintViolation(_)) => 409,

            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Queue(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,

            Error::Analysis(_) => 502,

            Error::ShuttingDown => 503,
            Error::Timeout { .. } => 504,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(_) => "validation_error",
            Error::Database(DatabaseError::NotFound(_)) => "not_found",
            Error::Database(DatabaseError::ConstraintViolation(_)) => "constraint_violation",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Queue(e) => match e {
                QueueError::InvalidMessage(_) => "invalid_message",
                QueueError::UnsupportedVersion { .. } => "unsupported_message_version",
                QueueError::GroupNotFound { .. } => "queue_group_not_found",
                _ => "queue_error",
            },
            Error::Analysis(e) => match e {
                AnalysisError::Timeout(_) => "analysis_timeout",
                AnalysisError::Rejected { .. } => "analysis_rejected",
                _ => "analysis_error",
            },
            Error::Chunking(_) => "chunking_error",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Timeout { .. } => "timeout",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::InvalidTransition {
                job_id,
                from,
                to,
                actor,
            } => Some(serde_json::json!({
                "job_id": job_id,
                "current_status": from,
                "requested_status": to,
                "actor": actor,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::Queue(QueueError::UnsupportedVersion { found, expected }) => {
                Some(serde_json::json!({ "found": found, "expected": expected }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transition() -> Error {
        Error::InvalidTransition {
            job_id: JobId(7),
            from: JobStatus::Chunking,
            to: JobStatus::QueuedForChunking,
            actor: Actor::Intake,
        }
    }

    #[test]
    fn every_kind_maps_to_expected_status_and_code() {
        let cases: Vec<(Error, u16, &str)> = vec![
            (Error::Validation("empty source_ref".into()), 400, "validation_error"),
            (
                Error::Config {
                    message: "must be positive".into(),
                    key: Some("splitter.max_unit_tokens".into()),
                },
                400,
                "config_error",
            ),
            (Error::Chunking("window is zero".into()), 422, "chunking_error"),
            (
                Error::Queue(QueueError::InvalidMessage("missing type".into())),
                422,
                "invalid_message",
            ),
            (
                Error::Queue(QueueError::UnsupportedVersion {
                    found: 0,
                    expected: 1,
                }),
                422,
                "unsupported_message_version",
            ),
            (
                Error::Queue(QueueError::PublishFailed {
                    stream: "s".into(),
                    reason: "locked".into(),
                }),
                500,
                "queue_error",
            ),
            (Error::NotFound("job 3".into()), 404, "not_found"),
            (
                Error::Database(DatabaseError::NotFound("job 3".into())),
                404,
                "not_found",
            ),
            (
                Error::Database(DatabaseError::QueryFailed("boom".into())),
                500,
                "database_error",
            ),
            (sample_transition(), 409, "invalid_transition"),
            (
                Error::Analysis(AnalysisError::Timeout(Duration::from_secs(1))),
                502,
                "analysis_timeout",
            ),
            (
                Error::Analysis(AnalysisError::Rejected {
                    status: 400,
                    body: "bad".into(),
                }),
                502,
                "analysis_rejected",
            ),
            (Error::ShuttingDown, 503, "shutting_down"),
            (
                Error::Timeout {
                    operation: "persist unit".into(),
                    timeout: Duration::from_secs(5),
                },
                504,
                "timeout",
            ),
        ];

        for (error, status, code) in cases {
            assert_eq!(error.status_code(), status, "status for {error}");
            assert_eq!(error.error_code(), code, "code for {error}");
        }
    }

    #[test]
    fn invalid_transition_details_name_both_statuses() {
        let api: ApiError = sample_transition().into();

        assert_eq!(api.error.code, "invalid_transition");
        let details = api.error.details.unwrap();
        assert_eq!(details["job_id"], 7);
        assert_eq!(details["current_status"], "chunking");
        assert_eq!(details["requested_status"], "queued_for_chunking");
        assert_eq!(details["actor"], "intake");
    }

    #[test]
    fn api_error_without_details_omits_field() {
        let api: ApiError = Error::ShuttingDown.into();
        let json = serde_json::to_value(&api).unwrap();

        assert_eq!(json["error"]["code"], "shutting_down");
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn message_matches_display() {
        let err = Error::Chunking("window is zero".into());
        let display = err.to_string();
        let api: ApiError = err.into();
        assert_eq!(api.error.message, display);
    }
}
