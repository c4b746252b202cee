use super::*;

#[tokio::test]
async fn create_upload_and_confirm_flow() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let app = app(&pipeline);

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/jobs", json!({"source_ref": "pilot.pdf"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let job = json_body(response).await;
    assert_eq!(job["status"], "created");
    let id = job["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/v1/jobs/{id}/uploading"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "uploading");

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/jobs/{id}/upload-complete"),
            json!({"object_key": "uploads/pilot.txt"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job = json_body(response).await;
    assert_eq!(job["status"], "queued_for_chunking");
    assert_eq!(job["object_key"], "uploads/pilot.txt");

    // A second confirmation conflicts
    let response = app
        .oneshot(post_json(
            &format!("/api/v1/jobs/{id}/upload-complete"),
            json!({"object_key": "uploads/pilot.txt"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error = json_body(response).await;
    assert_eq!(error["error"]["code"], "invalid_transition");
    assert_eq!(error["error"]["details"]["current_status"], "queued_for_chunking");
}

#[tokio::test]
async fn create_with_text_queues_chunking() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;

    let response = app(&pipeline)
        .oneshot(post_json(
            "/api/v1/jobs",
            json!({"source_ref": "pilot.txt", "text": screenplay(2)}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let job = json_body(response).await;
    assert_eq!(job["status"], "queued_for_chunking");
}

#[tokio::test]
async fn blank_source_ref_is_bad_request() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;

    let response = app(&pipeline)
        .oneshot(post_json("/api/v1/jobs", json!({"source_ref": " "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "validation_error");
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let app = app(&pipeline);

    for uri in [
        "/api/v1/jobs/77",
        "/api/v1/jobs/77/units",
        "/api/v1/jobs/77/checkpoint",
        "/api/v1/jobs/77/graph",
        "/api/v1/jobs/77/progress",
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn list_jobs_filters_by_status() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    pipeline.create_job("a.txt").await.unwrap();
    pipeline.submit_text("b.txt", &screenplay(1)).await.unwrap();
    let app = app(&pipeline);

    let response = app.clone().oneshot(get("/api/v1/jobs")).await.unwrap();
    assert_eq!(json_body(response).await.as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(get("/api/v1/jobs?status=queued_for_chunking"))
        .await
        .unwrap();
    let jobs = json_body(response).await;
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    assert_eq!(jobs[0]["source_ref"], "b.txt");

    let response = app
        .oneshot(get("/api/v1/jobs?status=sleeping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn finished_job_exposes_units_checkpoint_and_graph() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    pipeline.start_workers().await.unwrap();
    let job = pipeline.submit_text("pilot.txt", &screenplay(3)).await.unwrap();
    crate::pipeline::test_helpers::wait_for_status(
        &pipeline,
        job.id,
        crate::types::JobStatus::Completed,
    )
    .await;
    let app = app(&pipeline);
    let id = job.id;

    let units = json_body(
        app.clone()
            .oneshot(get(&format!("/api/v1/jobs/{id}/units")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(units.as_array().unwrap().len(), 3);
    assert!(units.as_array().unwrap().iter().all(|u| u["status"] == "done"));

    let checkpoint = json_body(
        app.clone()
            .oneshot(get(&format!("/api/v1/jobs/{id}/checkpoint")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(checkpoint["lastProcessedIndex"], 2);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/jobs/{id}/checkpoint?stage=chunking")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let graph = json_body(
        app.oneshot(get(&format!("/api/v1/jobs/{id}/graph")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 4);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn resubmit_and_abandon_map_errors() {
    let (pipeline, analyzer, _temp_dir) =
        create_test_pipeline_with(ScriptedAnalyzer::failing_on([0])).await;
    let pipeline = Arc::new(pipeline);
    pipeline.start_workers().await.unwrap();
    let job = pipeline.submit_text("pilot.txt", &screenplay(1)).await.unwrap();
    crate::pipeline::test_helpers::wait_for_status(
        &pipeline,
        job.id,
        crate::types::JobStatus::AnalysisFailed,
    )
    .await;
    let app = app(&pipeline);
    let id = job.id;

    analyzer.heal();
    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/v1/jobs/{id}/resubmit"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    crate::pipeline::test_helpers::wait_for_status(
        &pipeline,
        job.id,
        crate::types::JobStatus::Completed,
    )
    .await;

    // Completed jobs are neither resubmittable nor abandonable
    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/v1/jobs/{id}/resubmit"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            &format!("/api/v1/jobs/{id}/abandon"),
            json!({"reason": "done anyway"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn intake_after_shutdown_is_unavailable() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    pipeline.shutdown().await.unwrap();

    let response = app(&pipeline)
        .oneshot(post_json("/api/v1/jobs", json!({"source_ref": "late.txt"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
