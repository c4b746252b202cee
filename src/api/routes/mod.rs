//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`jobs`] - Intake, job queries and operator actions
//! - [`progress`] - Per-job progress stream
//! - [`system`] - Health and OpenAPI

use serde::{Deserialize, Serialize};

mod jobs;
mod progress;
mod system;

// Re-export all handlers so `routes::function_name` works from the router
pub use jobs::*;
pub use progress::*;
pub use system::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Query parameters for GET /jobs
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// Only return jobs in this status (e.g. "analysis_failed")
    pub status: Option<String>,
}

/// Request body for POST /jobs
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CreateJobRequest {
    /// Client-side name of the source document
    pub source_ref: String,
    /// Source text to store and queue right away; leave out to upload separately
    #[serde(default)]
    pub text: Option<String>,
}

/// Request body for POST /jobs/:id/upload-complete
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct UploadCompleteRequest {
    /// Key under which the source was stored
    pub object_key: String,
}

/// Request body for POST /jobs/:id/abandon
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct AbandonRequest {
    /// Why the job is given up
    pub reason: String,
}

/// Query parameters for GET /jobs/:id/checkpoint
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CheckpointQuery {
    /// Stage whose checkpoint to return: "analysis" (default) or "graph"
    pub stage: Option<String>,
}
