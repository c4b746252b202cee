//! Full pipeline runs against a mock HTTP analysis service

mod common;

use std::time::Duration;

use common::*;
use futures::StreamExt;
use scene_pipeline::{JobStatus, Pipeline, Stage, UnitStatus};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer};

async fn mock_service(service: &CueService) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(service.clone())
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn screenplay_flows_through_every_stage() {
    let service = CueService::default();
    let server = mock_service(&service).await;
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path(), &format!("{}/analyze", server.uri()));

    let pipeline = Pipeline::new(config).await.unwrap();
    pipeline.start_workers().await.unwrap();

    let job = pipeline.create_job("short.txt").await.unwrap();
    let progress = pipeline.subscribe(job.id);
    pipeline.mark_uploading(job.id).await.unwrap();
    let sources = scene_pipeline::FsSourceStore::new(temp_dir.path().join("sources"));
    scene_pipeline::SourceStore::put(&sources, "uploads/short.txt", SHORT_SCRIPT)
        .await
        .unwrap();
    pipeline
        .confirm_upload(job.id, "uploads/short.txt")
        .await
        .unwrap();

    let events = tokio::time::timeout(Duration::from_secs(15), progress.collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(events.last().unwrap().status, JobStatus::Completed);

    let job = pipeline.get_job(job.id).await.unwrap();
    assert_eq!((job.processed_units, job.total_units), (3, 3));
    assert_eq!(job.progress, 100.0);
    assert_eq!(service.request_count(), 3);

    let graph = pipeline.get_graph(job.id).await.unwrap();
    let anna = graph["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["id"] == "ANNA")
        .unwrap();
    assert_eq!(anna["size"], 2);
    let edges = graph["edges"].as_array().unwrap();
    assert!(
        edges
            .iter()
            .any(|e| e["source"] == "BEN" && e["target"] == "CARL" && e["weight"] == 1)
    );

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_unit_fails_stage_and_resubmit_recovers() {
    let service = CueService::poisoned(&["GARDEN"]);
    let server = mock_service(&service).await;
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path(), &format!("{}/analyze", server.uri()));

    let pipeline = Pipeline::new(config).await.unwrap();
    pipeline.start_workers().await.unwrap();
    let job = pipeline.submit_text("short.txt", SHORT_SCRIPT).await.unwrap();

    wait_for_status(&pipeline, job.id, JobStatus::AnalysisFailed, Duration::from_secs(15)).await;
    let units = pipeline.list_units(job.id).await.unwrap();
    assert_eq!(units[1].status, UnitStatus::Error);
    assert!(units[1].error_message.as_deref().unwrap().contains("422"));
    let checkpoint = pipeline
        .get_checkpoint(job.id, Stage::Analysis)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.last_processed_index, 0);

    // 422 is permanent, so it was not retried
    assert_eq!(service.request_count(), 3);

    service.heal();
    pipeline.resubmit(job.id).await.unwrap();
    wait_for_status(&pipeline, job.id, JobStatus::Completed, Duration::from_secs(15)).await;

    // Only the rejected unit was analyzed again
    assert_eq!(service.request_count(), 4);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn restarted_pipeline_finishes_queued_work() {
    let service = CueService::default();
    let server = mock_service(&service).await;
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path(), &format!("{}/analyze", server.uri()));

    // Submitted while no workers run, then the process goes away uncleanly
    let first = Pipeline::new(config.clone()).await.unwrap();
    let job = first.submit_text("short.txt", SHORT_SCRIPT).await.unwrap();
    drop(first);

    let second = Pipeline::new(config).await.unwrap();
    second.start_workers().await.unwrap();

    wait_for_status(&second, job.id, JobStatus::Completed, Duration::from_secs(15)).await;
    assert_eq!(service.request_count(), 3);

    second.shutdown().await.unwrap();
}
