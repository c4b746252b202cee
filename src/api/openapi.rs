//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the scene-pipeline REST API
//! using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the scene-pipeline REST API
///
/// The spec can be accessed via:
/// - `/api/v1/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "scene-pipeline REST API",
        version = "0.1.0",
        description = "REST API for submitting screenplays, tracking analysis jobs and streaming their progress",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790/api/v1", description = "Local development server")
    ),
    paths(
        // Jobs
        crate::api::routes::list_jobs,
        crate::api::routes::create_job,
        crate::api::routes::get_job,
        crate::api::routes::mark_uploading,
        crate::api::routes::upload_complete,
        crate::api::routes::resubmit_job,
        crate::api::routes::abandon_job,
        crate::api::routes::list_units,
        crate::api::routes::get_checkpoint,
        crate::api::routes::get_graph,
        crate::api::routes::job_progress,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::JobId,
        crate::types::JobStatus,
        crate::types::UnitStatus,
        crate::types::Stage,
        crate::types::Actor,
        crate::types::JobInfo,
        crate::types::UnitInfo,
        crate::types::UnitEvent,
        crate::types::ProgressEvent,
        crate::types::Checkpoint,

        // Graph types from graph.rs
        crate::graph::CharacterGraph,
        crate::graph::GraphNode,
        crate::graph::GraphEdge,

        // API request types from routes
        crate::api::routes::CreateJobRequest,
        crate::api::routes::UploadCompleteRequest,
        crate::api::routes::AbandonRequest,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "jobs", description = "Jobs - Submit sources, follow progress, inspect units, checkpoints and graphs, resubmit failed stages"),
        (name = "system", description = "System endpoints - Health check and OpenAPI spec"),
    )
)]
pub struct ApiDoc;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_lists_every_job_route() {
        let spec = ApiDoc::openapi();

        for path in [
            "/api/v1/jobs",
            "/api/v1/jobs/{id}",
            "/api/v1/jobs/{id}/upload-complete",
            "/api/v1/jobs/{id}/resubmit",
            "/api/v1/jobs/{id}/progress",
            "/api/v1/health",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn spec_has_schemas_and_tags() {
        let spec = ApiDoc::openapi();

        let components = spec.components.unwrap();
        assert!(components.schemas.contains_key("JobInfo"));
        assert!(components.schemas.contains_key("ProgressEvent"));

        let tags: Vec<String> = spec.tags.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(tags, ["jobs", "system"]);
    }

    #[test]
    fn spec_serializes_as_openapi_3() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();

        assert!(json["openapi"].as_str().unwrap().starts_with("3."));
        assert_eq!(json["info"]["title"], "scene-pipeline REST API");
    }
}
