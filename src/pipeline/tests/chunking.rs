use super::*;

#[tokio::test]
async fn chunking_persists_units_and_queues_one_message_each() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let job_id = chunked_job(&pipeline, 4).await;

    let job = pipeline.get_job(job_id).await.unwrap();
    assert_eq!(job.total_units, 4);
    assert_eq!(job.processed_units, 0);

    let units = pipeline.list_units(job_id).await.unwrap();
    let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, ["S1", "S2", "S3", "S4"]);
    assert_eq!(units[2].title, "INT. ROOM 3 - DAY");
    assert!(units.iter().all(|u| u.status == UnitStatus::Pending));

    let queue = raw_queue(&pipeline);
    let deliveries = queue
        .read_group(
            Stage::Analysis.stream(),
            Stage::Analysis.group(),
            "inspector",
            10,
            Duration::from_millis(10),
        )
        .await
        .unwrap();
    let indices: Vec<i64> = deliveries
        .iter()
        .map(|d| match StreamMessage::decode(&d.payload).unwrap() {
            StreamMessage::AnalyzeUnit { job_id: id, unit_index } => {
                assert_eq!(id, job_id);
                unit_index
            }
            other => panic!("unexpected message {other:?}"),
        })
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn empty_source_completes_with_zero_units() {
    let (pipeline, analyzer, _temp_dir) = create_test_pipeline().await;
    let job = pipeline.submit_text("blank.txt", "  \n\t\n").await.unwrap();

    drain_stage(&pipeline, Stage::Chunking).await;

    let job = pipeline.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_units, 0);
    assert_eq!(job.progress, 100.0);
    assert_eq!(drain_stage(&pipeline, Stage::Analysis).await, 0);
    assert_eq!(analyzer.call_count(), 0);
}

#[tokio::test]
async fn headerless_source_is_windowed() {
    let (mut pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let mut config = (*pipeline.config).clone();
    config.splitter.max_unit_tokens = 10;
    config.splitter.chars_per_token = 1;
    pipeline.config = Arc::new(config);

    let job = pipeline
        .submit_text("notes.txt", &"x".repeat(25))
        .await
        .unwrap();
    drain_stage(&pipeline, Stage::Chunking).await;

    let units = pipeline.list_units(job.id).await.unwrap();
    let titles: Vec<&str> = units.iter().map(|u| u.title.as_str()).collect();
    assert_eq!(titles, ["Chunk 1", "Chunk 2", "Chunk 3"]);
}

#[tokio::test]
async fn missing_source_fails_job() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let job = pipeline.create_job("lost.txt").await.unwrap();
    pipeline
        .confirm_upload(job.id, "uploads/lost.txt")
        .await
        .unwrap();

    drain_stage(&pipeline, Stage::Chunking).await;

    let job = pipeline.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("uploads/lost.txt"));
    // Handled, so acknowledged rather than retried
    assert_eq!(
        pipeline
            .queue
            .pending_count(Stage::Chunking.stream(), Stage::Chunking.group())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn splitter_error_is_a_chunking_failure() {
    let (mut pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let mut config = (*pipeline.config).clone();
    config.splitter.max_unit_tokens = 0;
    pipeline.config = Arc::new(config);

    let job = pipeline
        .submit_text("notes.txt", "no scene headers here")
        .await
        .unwrap();
    drain_stage(&pipeline, Stage::Chunking).await;

    let job = pipeline.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::ChunkingFailed);
    assert!(job.error_message.is_some());
}

#[tokio::test]
async fn redelivered_chunk_source_does_not_duplicate_units() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let job_id = chunked_job(&pipeline, 3).await;
    let object_key = pipeline.get_job(job_id).await.unwrap().object_key.unwrap();

    pipeline
        .handle_chunk_source(job_id, &object_key)
        .await
        .unwrap();

    assert_eq!(pipeline.list_units(job_id).await.unwrap().len(), 3);
    assert_eq!(pipeline.get_job(job_id).await.unwrap().total_units, 3);
    // The unfinished units were queued again; duplicates are absorbed by the result store
    assert_eq!(drain_stage(&pipeline, Stage::Analysis).await, 6);
}

#[tokio::test]
async fn interrupted_chunking_resumes() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let job = pipeline.submit_text("pilot.txt", &screenplay(2)).await.unwrap();
    let object_key = job.object_key.clone().unwrap();
    pipeline
        .registry
        .transition(
            job.id,
            crate::types::Actor::Chunking,
            JobStatus::QueuedForChunking,
            JobStatus::Chunking,
        )
        .await
        .unwrap();

    pipeline
        .handle_chunk_source(job.id, &object_key)
        .await
        .unwrap();

    assert_eq!(
        pipeline.get_job(job.id).await.unwrap().status,
        JobStatus::QueuedForAnalysis
    );
}

/// Run chunking's first transition and persistence by hand, as a worker that died right
/// after recording `chunking_complete` would have left it
async fn chunked_then_crashed(pipeline: &Pipeline, text: &str) -> JobId {
    let job = pipeline.submit_text("pilot.txt", text).await.unwrap();
    let units = crate::splitter::split_units(text, &pipeline.config.splitter).unwrap();

    pipeline
        .registry
        .transition(
            job.id,
            crate::types::Actor::Chunking,
            JobStatus::QueuedForChunking,
            JobStatus::Chunking,
        )
        .await
        .unwrap();
    pipeline.db.insert_units(job.id, &units).await.unwrap();
    pipeline
        .db
        .set_total_units(job.id, units.len() as i64)
        .await
        .unwrap();
    pipeline
        .registry
        .transition(
            job.id,
            crate::types::Actor::Chunking,
            JobStatus::Chunking,
            JobStatus::ChunkingComplete,
        )
        .await
        .unwrap();

    job.id
}

#[tokio::test]
async fn redelivered_chunk_source_moves_completed_chunking_on() {
    let (pipeline, analyzer, _temp_dir) = create_test_pipeline().await;
    let job_id = chunked_then_crashed(&pipeline, &screenplay(3)).await;

    // The chunk_source entry was never acknowledged
    assert_eq!(drain_stage(&pipeline, Stage::Chunking).await, 1);
    assert_eq!(
        pipeline.get_job(job_id).await.unwrap().status,
        JobStatus::QueuedForAnalysis
    );

    assert_eq!(drain_stage(&pipeline, Stage::Analysis).await, 3);
    assert_eq!(analyzer.call_count(), 3);
    assert_eq!(
        pipeline.get_job(job_id).await.unwrap().status,
        JobStatus::AnalysisComplete
    );
}

#[tokio::test]
async fn redelivered_chunk_source_completes_empty_job() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let job_id = chunked_then_crashed(&pipeline, " \n ").await;

    drain_stage(&pipeline, Stage::Chunking).await;

    let job = pipeline.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_units, 0);
    assert_eq!(drain_stage(&pipeline, Stage::Analysis).await, 0);
}
