use super::*;

#[tokio::test]
async fn observers_see_every_unit_and_the_final_event() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let job = pipeline.create_job("pilot.txt").await.unwrap();
    let first = pipeline.subscribe(job.id);
    let second = pipeline.subscribe(job.id);
    assert_eq!(pipeline.broadcaster().observer_count(job.id), 2);

    pipeline
        .sources
        .put("uploads/pilot.txt", &screenplay(3))
        .await
        .unwrap();
    pipeline
        .confirm_upload(job.id, "uploads/pilot.txt")
        .await
        .unwrap();
    pipeline.start_workers().await.unwrap();

    let collect = |observer: crate::broadcast::Observer| async move {
        tokio::time::timeout(Duration::from_secs(10), observer.collect::<Vec<_>>())
            .await
            .unwrap()
    };
    let (first, second) = tokio::join!(collect(first), collect(second));

    for events in [&first, &second] {
        assert_eq!(events.last().unwrap().status, JobStatus::Completed);

        let mut done: Vec<i64> = events
            .iter()
            .filter_map(|e| e.unit_event.as_ref())
            .filter(|u| u.status == UnitStatus::Done)
            .map(|u| u.unit_index)
            .collect();
        done.sort_unstable();
        assert_eq!(done, vec![0, 1, 2]);

        let last = events.last().unwrap();
        assert_eq!((last.processed_count, last.total_count), (3, 3));
    }
    assert_eq!(first.len(), second.len());
    assert_eq!(pipeline.broadcaster().topic_count(), 0);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn stage_failure_closes_observer_stream() {
    let (pipeline, _analyzer, _temp_dir) =
        create_test_pipeline_with(ScriptedAnalyzer::failing_on([0])).await;
    let job_id = chunked_job(&pipeline, 1).await;
    let observer = pipeline.subscribe(job_id);

    drain_stage(&pipeline, Stage::Analysis).await;

    let events = tokio::time::timeout(Duration::from_secs(5), observer.collect::<Vec<_>>())
        .await
        .unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.status, JobStatus::AnalysisFailed);
    assert!(
        events
            .iter()
            .any(|e| e.unit_event.as_ref().is_some_and(|u| u.status == UnitStatus::Error))
    );
}

#[tokio::test]
async fn unobserved_jobs_publish_nowhere() {
    let (pipeline, _analyzer, _temp_dir) = create_test_pipeline().await;
    let job_id = chunked_job(&pipeline, 2).await;
    drain_stage(&pipeline, Stage::Analysis).await;

    assert_eq!(pipeline.broadcaster().topic_count(), 0);
    assert_eq!(pipeline.broadcaster().observer_count(job_id), 0);
}
