use super::*;
use crate::types::JobStatus;

/// Parse `data:` lines of an SSE body into JSON values
fn sse_data(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

async fn read_stream(response: Response) -> String {
    let bytes = tokio::time::timeout(
        Duration::from_secs(10),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("progress stream should close after a settled event")
    .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn progress_streams_until_completion() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let job = pipeline.create_job("pilot.txt").await.unwrap();
    pipeline
        .sources
        .put("uploads/pilot.txt", &screenplay(2))
        .await
        .unwrap();

    let response = app(&pipeline)
        .oneshot(get(&format!("/api/v1/jobs/{}/progress", job.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.contains("text/event-stream"), "{content_type}");

    pipeline.start_workers().await.unwrap();
    pipeline
        .confirm_upload(job.id, "uploads/pilot.txt")
        .await
        .unwrap();

    let body = read_stream(response).await;
    let events = sse_data(&body);

    assert_eq!(events[0]["status"], "created");
    assert_eq!(events.last().unwrap()["status"], "completed");
    assert!(body.contains("event: unit") || body.contains("event:unit"));
    let unit_events = events.iter().filter(|e| e["unitEvent"].is_object()).count();
    assert_eq!(unit_events, 2);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn settled_job_gets_snapshot_only() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let job = pipeline.submit_text("empty.txt", "").await.unwrap();
    crate::pipeline::test_helpers::drain_stage(&pipeline, crate::types::Stage::Chunking).await;
    assert_eq!(
        pipeline.get_job(job.id).await.unwrap().status,
        JobStatus::Completed
    );

    let response = app(&pipeline)
        .oneshot(get(&format!("/api/v1/jobs/{}/progress", job.id)))
        .await
        .unwrap();
    let events = sse_data(&read_stream(response).await);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["status"], "completed");
    assert_eq!(pipeline.broadcaster().topic_count(), 0);
}
