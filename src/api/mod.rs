//! REST API server module
//!
//! Provides an OpenAPI documented REST API for submitting sources, following jobs
//! through the pipeline and resubmitting failed stages.

use crate::{Config, Pipeline, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// Every route lives under `/api/v1`.
///
/// # Routes
///
/// ## Jobs
/// - `GET /jobs?status=` - List jobs, newest first
/// - `POST /jobs` - Create a job (optionally with its source text)
/// - `GET /jobs/:id` - Get single job
/// - `POST /jobs/:id/uploading` - Record that the upload started
/// - `POST /jobs/:id/upload-complete` - Confirm the upload and queue chunking
/// - `POST /jobs/:id/resubmit` - Re-run a failed stage
/// - `POST /jobs/:id/abandon` - Give up on a failed job
/// - `GET /jobs/:id/units` - List units
/// - `GET /jobs/:id/checkpoint?stage=` - Get a stage checkpoint
/// - `GET /jobs/:id/graph` - Get the character graph
/// - `GET /jobs/:id/progress` - Server-sent progress events
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
pub fn create_router(pipeline: Arc<Pipeline>, config: Arc<Config>) -> Router {
    let state = AppState::new(pipeline, config.clone());

    let api = Router::new()
        // Jobs
        .route("/jobs", get(routes::list_jobs).post(routes::create_job))
        .route("/jobs/:id", get(routes::get_job))
        .route("/jobs/:id/uploading", post(routes::mark_uploading))
        .route("/jobs/:id/upload-complete", post(routes::upload_complete))
        .route("/jobs/:id/resubmit", post(routes::resubmit_job))
        .route("/jobs/:id/abandon", post(routes::abandon_job))
        .route("/jobs/:id/units", get(routes::list_units))
        .route("/jobs/:id/checkpoint", get(routes::get_checkpoint))
        .route("/jobs/:id/graph", get(routes::get_graph))
        .route("/jobs/:id/progress", get(routes::job_progress))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = Router::new().nest("/api/v1", api);

    // SwaggerUi points at the /api/v1/openapi.json endpoint defined above
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server fails or the pipeline stops accepting work.
///
/// # Example
///
/// ```no_run
/// use scene_pipeline::{Config, Pipeline};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let pipeline = Arc::new(Pipeline::new((*config).clone()).await?);
///
/// // Start API server (blocks until shutdown)
/// scene_pipeline::api::start_api_server(pipeline, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(pipeline: Arc<Pipeline>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(
        address = %bind_address,
        "Starting API server"
    );

    let shutdown = pipeline.shutdown_signal();
    let app = create_router(pipeline, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %bind_address,
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
