//! Per-job progress stream over server-sent events.

use crate::api::AppState;
use crate::error::Result;
use crate::types::{JobId, ProgressEvent};
use axum::{
    extract::{Path, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::{Stream, StreamExt, stream};
use std::convert::Infallible;

/// GET /jobs/:id/progress - Server-sent progress events for one job
///
/// The first event is a snapshot of the job's current state. The stream closes after an
/// event carrying a settled status (completed, failed or a stage failure); for a job that
/// is already settled that is the snapshot itself.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/progress",
    tag = "jobs",
    params(
        ("id" = i64, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Progress events (text/event-stream)", content_type = "text/event-stream", body = ProgressEvent),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn job_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>>> {
    let job_id = JobId(id);

    // Subscribe before reading the snapshot so nothing falls in between
    let observer = state.pipeline.subscribe(job_id);
    let job = state.pipeline.get_job(job_id).await?;

    let snapshot = ProgressEvent::job(
        job.id,
        job.status,
        job.processed_units,
        job.total_units,
        job.status_message.clone().unwrap_or_default(),
    );
    let live = (!job.status.is_settled()).then_some(observer);

    tracing::debug!(job_id = %job_id, status = %job.status, "Progress stream opened");

    let events = stream::once(async move { snapshot })
        .chain(stream::iter(live).flatten())
        .filter_map(|event| async move {
            let kind = if event.unit_event.is_some() {
                "unit"
            } else {
                "job"
            };
            match SseEvent::default().event(kind).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    tracing::warn!(job_id = %event.job_id, error = %e, "Failed to serialize progress event");
                    None
                }
            }
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
