//! Job handlers: intake, queries and operator actions.

use super::{AbandonRequest, CheckpointQuery, CreateJobRequest, ListJobsQuery, UploadCompleteRequest};
use crate::api::AppState;
use crate::error::{Error, Result};
use crate::types::{Checkpoint, JobId, JobInfo, JobStatus, Stage, UnitInfo};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

/// GET /jobs - List jobs, newest first
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    tag = "jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Jobs, newest first", body = Vec<JobInfo>),
        (status = 400, description = "Unknown status filter", body = crate::error::ApiError)
    )
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobInfo>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<JobStatus>().map_err(Error::Validation))
        .transpose()?;

    Ok(Json(state.pipeline.list_jobs(status).await?))
}

/// POST /jobs - Create a job
///
/// With `text` the source is stored and queued for chunking in the same call.
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    tag = "jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job created", body = JobInfo),
        (status = 400, description = "Empty source_ref", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobInfo>)> {
    let job = match request.text {
        Some(text) => state.pipeline.submit_text(&request.source_ref, &text).await?,
        None => state.pipeline.create_job(&request.source_ref).await?,
    };

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /jobs/:id - Get one job
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    tag = "jobs",
    params(
        ("id" = i64, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job", body = JobInfo),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn get_job(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<JobInfo>> {
    Ok(Json(state.pipeline.get_job(JobId(id)).await?))
}

/// POST /jobs/:id/uploading - Record that the upload started
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/uploading",
    tag = "jobs",
    params(
        ("id" = i64, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job moved to uploading", body = JobInfo),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job is not in created", body = crate::error::ApiError)
    )
)]
pub async fn mark_uploading(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<JobInfo>> {
    Ok(Json(state.pipeline.mark_uploading(JobId(id)).await?))
}

/// POST /jobs/:id/upload-complete - Confirm the upload and queue chunking
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/upload-complete",
    tag = "jobs",
    params(
        ("id" = i64, Path, description = "Job ID")
    ),
    request_body = UploadCompleteRequest,
    responses(
        (status = 202, description = "Job queued for chunking", body = JobInfo),
        (status = 400, description = "Empty object_key", body = crate::error::ApiError),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job is not in created or uploading", body = crate::error::ApiError)
    )
)]
pub async fn upload_complete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UploadCompleteRequest>,
) -> Result<(StatusCode, Json<JobInfo>)> {
    let job = state
        .pipeline
        .confirm_upload(JobId(id), &request.object_key)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// POST /jobs/:id/resubmit - Re-run the failed stage
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/resubmit",
    tag = "jobs",
    params(
        ("id" = i64, Path, description = "Job ID")
    ),
    responses(
        (status = 202, description = "Failed stage queued again", body = JobInfo),
        (status = 400, description = "Job is not in a stage failure", body = crate::error::ApiError),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job changed status concurrently", body = crate::error::ApiError)
    )
)]
pub async fn resubmit_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<JobInfo>)> {
    let job = state.pipeline.resubmit(JobId(id)).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// POST /jobs/:id/abandon - Give up on a failed job
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/abandon",
    tag = "jobs",
    params(
        ("id" = i64, Path, description = "Job ID")
    ),
    request_body = AbandonRequest,
    responses(
        (status = 200, description = "Job moved to failed", body = JobInfo),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job is not in a stage failure", body = crate::error::ApiError)
    )
)]
pub async fn abandon_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AbandonRequest>,
) -> Result<Json<JobInfo>> {
    Ok(Json(state.pipeline.abandon(JobId(id), &request.reason).await?))
}

/// GET /jobs/:id/units - List a job's units
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/units",
    tag = "jobs",
    params(
        ("id" = i64, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Units in index order", body = Vec<UnitInfo>),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn list_units(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<UnitInfo>>> {
    Ok(Json(state.pipeline.list_units(JobId(id)).await?))
}

/// GET /jobs/:id/checkpoint - Get a stage checkpoint
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/checkpoint",
    tag = "jobs",
    params(
        ("id" = i64, Path, description = "Job ID"),
        CheckpointQuery
    ),
    responses(
        (status = 200, description = "Checkpoint", body = Checkpoint),
        (status = 400, description = "Unknown stage", body = crate::error::ApiError),
        (status = 404, description = "Job or checkpoint not found", body = crate::error::ApiError)
    )
)]
pub async fn get_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<CheckpointQuery>,
) -> Result<Json<Checkpoint>> {
    let stage = match query.stage.as_deref() {
        None | Some("analysis") => Stage::Analysis,
        Some("graph") => Stage::Graph,
        Some(other) => {
            return Err(Error::Validation(format!(
                "unknown checkpoint stage '{}', expected analysis or graph",
                other
            )));
        }
    };

    let job_id = JobId(id);
    state
        .pipeline
        .get_checkpoint(job_id, stage)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("{} checkpoint of job {}", stage, job_id)))
}

/// GET /jobs/:id/graph - Get the character graph
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/graph",
    tag = "jobs",
    params(
        ("id" = i64, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Character graph", body = crate::graph::CharacterGraph),
        (status = 404, description = "Job or graph not found", body = crate::error::ApiError)
    )
)]
pub async fn get_graph(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    Ok(Json(state.pipeline.get_graph(JobId(id)).await?))
}
