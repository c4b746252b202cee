use super::*;
use crate::pipeline::test_helpers::{ScriptedAnalyzer, create_test_pipeline_with, screenplay};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

mod jobs;
mod progress;

/// Helper to create a test Pipeline wrapped in Arc
async fn create_test_pipeline() -> (Arc<Pipeline>, Arc<ScriptedAnalyzer>, tempfile::TempDir) {
    let (pipeline, analyzer, temp_dir) = create_test_pipeline_with(ScriptedAnalyzer::new()).await;
    (Arc::new(pipeline), analyzer, temp_dir)
}

fn app(pipeline: &Arc<Pipeline>) -> Router {
    create_router(pipeline.clone(), pipeline.get_config())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_reports_version_and_intake_state() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;

    let response = app(&pipeline).oneshot(get("/api/v1/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["accepting"], true);
}

#[tokio::test]
async fn openapi_json_is_served() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;

    let response = app(&pipeline)
        .oneshot(get("/api/v1/openapi.json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert!(json["openapi"].as_str().unwrap().starts_with("3."));
    assert!(json["paths"]["/api/v1/jobs/{id}/progress"].is_object());
}

#[tokio::test]
async fn swagger_ui_follows_config() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;

    let response = app(&pipeline).oneshot(get("/swagger-ui/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut config = (*pipeline.get_config()).clone();
    config.api.swagger_ui = false;
    let response = create_router(pipeline.clone(), Arc::new(config))
        .oneshot(get("/swagger-ui/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cors_headers_are_added_when_enabled() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app(&pipeline).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn specific_cors_origins_reject_others() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let mut config = (*pipeline.get_config()).clone();
    config.api.cors_origins = vec!["http://allowed.test".to_string()];
    let router = create_router(pipeline.clone(), Arc::new(config));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://other.test")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn server_serves_until_pipeline_shutdown() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;

    // Find a free port, then hand it to the server
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut config = (*pipeline.get_config()).clone();
    config.api.bind_address = addr;
    let server = tokio::spawn(start_api_server(pipeline.clone(), Arc::new(config)));

    let client = reqwest::Client::new();
    let url = format!("http://{}/api/v1/health", addr);
    let mut response = None;
    for _ in 0..50 {
        if let Ok(r) = client.get(&url).send().await {
            response = Some(r);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(response.unwrap().status(), reqwest::StatusCode::OK);

    pipeline.shutdown().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
