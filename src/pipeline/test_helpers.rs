//! Shared test helpers for creating Pipeline instances in tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::tempdir;

use crate::analysis::{AnalysisRequest, Analyzer};
use crate::config::Config;
use crate::error::AnalysisError;
use crate::pipeline::Pipeline;
use crate::types::{JobId, JobStatus};

/// Analyzer that extracts speaker cues and can be told to fail on given units
#[derive(Default)]
pub(crate) struct ScriptedAnalyzer {
    calls: Mutex<Vec<i64>>,
    failing: Mutex<HashSet<i64>>,
    delay: Option<Duration>,
}

impl ScriptedAnalyzer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail every attempt on these unit indices until [`heal`](Self::heal) is called
    pub(crate) fn failing_on(indices: impl IntoIterator<Item = i64>) -> Self {
        Self {
            failing: Mutex::new(indices.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Sleep this long inside every call
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Unit indices analyzed so far, in call order
    pub(crate) fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Upper-case lines that are not scene headers, as character names
pub(crate) fn speaker_cues(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with("INT.")
                && !line.starts_with("EXT.")
                && line.chars().all(|c| c.is_ascii_uppercase() || c == ' ')
        })
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<serde_json::Value, AnalysisError> {
        self.calls.lock().unwrap().push(request.unit_index);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(&request.unit_index) {
            return Err(AnalysisError::Rejected {
                status: 422,
                body: format!("unit {} rejected", request.unit_index),
            });
        }

        Ok(json!({
            "unitId": request.unit_id,
            "characters": speaker_cues(&request.text),
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Configuration pointing every path into `dir`, with fast queue timing
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.sources.root_dir = dir.join("sources");
    config.queue.block_timeout = Duration::from_millis(100);
    config.queue.poll_interval = Duration::from_millis(20);
    config.queue.claim_timeout = Duration::from_secs(30);
    config.worker.analysis_workers = 2;
    config.worker.analysis_timeout = Duration::from_secs(5);
    config.worker.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Helper to create a test Pipeline with a persistent database.
/// Returns the pipeline, its analyzer and the tempdir (which must be kept alive).
pub(crate) async fn create_test_pipeline_with(
    analyzer: ScriptedAnalyzer,
) -> (Pipeline, Arc<ScriptedAnalyzer>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let analyzer = Arc::new(analyzer);

    let pipeline = Pipeline::with_analyzer(config, analyzer.clone())
        .await
        .unwrap();

    (pipeline, analyzer, temp_dir)
}

pub(crate) async fn create_test_pipeline() -> (Pipeline, Arc<ScriptedAnalyzer>, tempfile::TempDir) {
    create_test_pipeline_with(ScriptedAnalyzer::new()).await
}

/// Screenplay with `scenes` scenes, each naming two characters
pub(crate) fn screenplay(scenes: usize) -> String {
    let cast = ["ANNA", "BEN", "CARL", "DORA"];
    (0..scenes)
        .map(|i| {
            format!(
                "INT. ROOM {} - DAY\n\n{}\nHello.\n\n{}\nHi.\n\n",
                i + 1,
                cast[i % cast.len()],
                cast[(i + 1) % cast.len()]
            )
        })
        .collect()
}

/// Poll until the job reaches `status` or the deadline passes
pub(crate) async fn wait_for_status(pipeline: &Pipeline, job_id: JobId, status: JobStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let current = pipeline.get_job(job_id).await.unwrap().status;
        if current == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {current}, expected {status}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Drive one stage by hand: read every available entry and handle it
pub(crate) async fn drain_stage(pipeline: &Pipeline, stage: crate::types::Stage) -> usize {
    let cancel = tokio_util::sync::CancellationToken::new();
    let mut handled = 0;
    loop {
        let batch = pipeline
            .queue
            .read_group(
                stage.stream(),
                stage.group(),
                "test-consumer",
                10,
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        if batch.is_empty() {
            return handled;
        }
        for delivery in batch {
            pipeline
                .handle_delivery(stage, "test-consumer", delivery, &cancel)
                .await;
            handled += 1;
        }
    }
}
