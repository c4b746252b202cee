use super::*;
use crate::db::Database;

#[tokio::test]
async fn shutdown_stops_intake_and_marks_clean_exit() {
    let (pipeline, _analyzer, temp_dir) = create_test_pipeline().await;
    pipeline.start_workers().await.unwrap();
    assert!(pipeline.is_accepting());

    pipeline.shutdown().await.unwrap();

    assert!(!pipeline.is_accepting());
    assert!(matches!(
        pipeline.create_job("late.txt").await,
        Err(Error::ShuttingDown)
    ));
    assert!(matches!(
        pipeline.start_workers().await,
        Err(Error::ShuttingDown)
    ));

    let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
    assert!(!db.was_unclean_shutdown().await.unwrap());
    db.close().await;
}

#[tokio::test]
async fn startup_without_shutdown_is_detected_as_unclean() {
    let (pipeline, _analyzer, temp_dir) = create_test_pipeline().await;
    drop(pipeline);

    let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());
    db.close().await;
}

#[tokio::test]
async fn work_left_pending_by_a_dead_worker_is_reclaimed() {
    let (pipeline, analyzer, _temp_dir) = create_test_pipeline().await;
    let mut config = (*pipeline.config).clone();
    config.queue.claim_timeout = Duration::from_millis(200);
    let pipeline = Pipeline {
        config: Arc::new(config),
        ..pipeline
    };

    let job = pipeline.submit_text("pilot.txt", &screenplay(2)).await.unwrap();
    drain_stage(&pipeline, Stage::Chunking).await;

    // A worker that read the unit entries and died before acknowledging them
    pipeline
        .queue
        .read_group(
            Stage::Analysis.stream(),
            Stage::Analysis.group(),
            "crashed-worker",
            10,
            Duration::from_millis(10),
        )
        .await
        .unwrap();

    pipeline.start_workers().await.unwrap();
    wait_for_status(&pipeline, job.id, JobStatus::Completed).await;
    assert_eq!(analyzer.call_count(), 2);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn groups_are_created_for_every_stage() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;

    for stage in Stage::ALL {
        assert_eq!(
            pipeline
                .queue
                .pending_count(stage.stream(), stage.group())
                .await
                .unwrap(),
            0
        );
        // Creating it again is not an error
        pipeline
            .queue
            .ensure_group(stage.stream(), stage.group())
            .await
            .unwrap();
    }
}
