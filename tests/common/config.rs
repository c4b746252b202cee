//! Test configuration helpers for pipelines backed by a mock analysis service

use std::path::Path;
use std::time::Duration;

use scene_pipeline::{Config, JobId, JobStatus, Pipeline};

/// Configuration rooted in `dir` with fast queue timing, analyzing through `endpoint`
pub fn test_config(dir: &Path, endpoint: &str) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("pipeline.db");
    config.sources.root_dir = dir.join("sources");
    config.queue.block_timeout = Duration::from_millis(100);
    config.queue.poll_interval = Duration::from_millis(20);
    config.worker.analysis_workers = 3;
    config.worker.shutdown_timeout = Duration::from_secs(5);
    config.analysis.endpoint = Some(endpoint.to_string());
    config.analysis.auth_header = Some("Bearer test-token".to_string());
    config.analysis.request_timeout = Duration::from_secs(5);
    config.analysis.retry.max_attempts = 2;
    config.analysis.retry.initial_delay = Duration::from_millis(10);
    config.analysis.retry.jitter = false;
    config
}

/// Poll until the job reaches `status`, panicking after `timeout`
pub async fn wait_for_status(pipeline: &Pipeline, job_id: JobId, status: JobStatus, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = pipeline.get_job(job_id).await.unwrap().status;
        if current == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {current}, expected {status}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
