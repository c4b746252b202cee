//! Graph stage: aggregate unit results into the job's character graph.

use crate::db::StatusUpdate;
use crate::error::{Error, Result};
use crate::graph::build_character_graph;
use crate::types::{Actor, JobId, JobStatus, Stage};

use super::Pipeline;

impl Pipeline {
    /// Handle a `generate_graph` message
    ///
    /// Duplicates are absorbed by the compare-and-set out of `analysis_complete`. A job left
    /// in `generating_graph` or `graph_generation_complete` by a dead worker is finished.
    pub(crate) async fn handle_generate_graph(&self, job_id: JobId) -> Result<()> {
        let row = self.registry.row(job_id).await?;
        match row.status {
            JobStatus::AnalysisComplete => {
                match self
                    .registry
                    .transition(
                        job_id,
                        Actor::Graph,
                        JobStatus::AnalysisComplete,
                        JobStatus::GeneratingGraph,
                    )
                    .await
                {
                    Ok(()) => {}
                    Err(Error::InvalidTransition { from, .. }) => {
                        tracing::debug!(job_id = %job_id, status = %from, "Another worker took graph generation");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            JobStatus::GeneratingGraph => {
                tracing::info!(job_id = %job_id, "Resuming interrupted graph generation");
            }
            JobStatus::GraphGenerationComplete => {
                tracing::info!(job_id = %job_id, "Graph already stored, completing job");
                let summary = row
                    .status_message
                    .unwrap_or_else(|| "character graph generated".to_string());
                return self.complete_job(job_id, &summary).await;
            }
            other => {
                tracing::debug!(job_id = %job_id, status = %other, "Ignoring generate_graph for job not awaiting a graph");
                return Ok(());
            }
        }

        self.emit_job(job_id, JobStatus::GeneratingGraph, "building character graph")
            .await;
        self.advance_checkpoint(job_id, Stage::Graph).await;

        let results = self.db.completed_results(job_id).await?;
        let graph = match build_character_graph(&results) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Graph generation failed");
                let reason = e.to_string();
                self.registry
                    .transition_with(
                        job_id,
                        Actor::Graph,
                        JobStatus::GeneratingGraph,
                        JobStatus::GraphGenerationFailed,
                        StatusUpdate {
                            message: Some("graph generation failed"),
                            error: Some(&reason),
                        },
                    )
                    .await?;
                self.emit_job(job_id, JobStatus::GraphGenerationFailed, &reason)
                    .await;
                return Ok(());
            }
        };

        let nodes = graph.nodes.len();
        let edges = graph.edges.len();
        let value = serde_json::to_value(&graph)?;
        self.persist("store graph", self.db.store_graph(job_id, &value))
            .await?;

        let summary = format!("graph with {} characters and {} relationships", nodes, edges);
        self.registry
            .transition_with(
                job_id,
                Actor::Graph,
                JobStatus::GeneratingGraph,
                JobStatus::GraphGenerationComplete,
                StatusUpdate {
                    message: Some(&summary),
                    error: None,
                },
            )
            .await?;
        tracing::info!(job_id = %job_id, nodes, edges, "Character graph stored");
        self.complete_job(job_id, &summary).await
    }

    async fn complete_job(&self, job_id: JobId, summary: &str) -> Result<()> {
        match self
            .registry
            .transition_with(
                job_id,
                Actor::Graph,
                JobStatus::GraphGenerationComplete,
                JobStatus::Completed,
                StatusUpdate {
                    message: Some(summary),
                    error: None,
                },
            )
            .await
        {
            Ok(()) => {}
            Err(Error::InvalidTransition { from, .. }) => {
                tracing::debug!(job_id = %job_id, status = %from, "Job already completed");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        tracing::info!(job_id = %job_id, "Job completed");
        self.emit_job(job_id, JobStatus::Completed, summary).await;
        Ok(())
    }
}
