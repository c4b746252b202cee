//! Chunking stage: source text in, persisted units and `analyze_unit` messages out.

use crate::db::StatusUpdate;
use crate::error::{Error, Result};
use crate::queue::StreamMessage;
use crate::splitter::split_units;
use crate::types::{Actor, JobId, JobStatus, UnitStatus};

use super::Pipeline;

impl Pipeline {
    /// Handle a `chunk_source` message
    ///
    /// Redelivery is safe: units are inserted idempotently, a job left in
    /// `chunking_complete` is moved on, and a job already queued for analysis only gets its
    /// unfinished units re-enqueued.
    pub(crate) async fn handle_chunk_source(&self, job_id: JobId, object_key: &str) -> Result<()> {
        let row = self.registry.row(job_id).await?;

        match row.status {
            JobStatus::QueuedForChunking => {
                match self
                    .registry
                    .transition(
                        job_id,
                        Actor::Chunking,
                        JobStatus::QueuedForChunking,
                        JobStatus::Chunking,
                    )
                    .await
                {
                    Ok(()) => {}
                    Err(Error::InvalidTransition { from, .. }) => {
                        tracing::debug!(job_id = %job_id, current = %from, "Another worker took the chunking job");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            // Previous attempt died mid-chunking
            JobStatus::Chunking => {
                tracing::info!(job_id = %job_id, "Resuming interrupted chunking");
            }
            // Previous attempt died between chunking_complete and the next transition
            JobStatus::ChunkingComplete => {
                tracing::info!(job_id = %job_id, units = row.total_units, "Resuming completed chunking");
                return self.finish_chunking(job_id, row.total_units).await;
            }
            JobStatus::QueuedForAnalysis => {
                return self.enqueue_open_units(job_id).await;
            }
            other => {
                tracing::debug!(job_id = %job_id, status = %other, "Ignoring chunk_source for job past chunking");
                return Ok(());
            }
        }

        self.emit_job(job_id, JobStatus::Chunking, "chunking source")
            .await;

        let text = match self.sources.fetch(object_key).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(job_id = %job_id, object_key, error = %e, "Source unreadable, failing job");
                let reason = e.to_string();
                self.registry
                    .transition_with(
                        job_id,
                        Actor::Chunking,
                        JobStatus::Chunking,
                        JobStatus::Failed,
                        StatusUpdate {
                            message: Some("source unreadable"),
                            error: Some(&reason),
                        },
                    )
                    .await?;
                self.emit_job(job_id, JobStatus::Failed, &reason).await;
                return Ok(());
            }
        };

        let units = match split_units(&text, &self.config.splitter) {
            Ok(units) => units,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Splitting failed");
                let reason = e.to_string();
                self.registry
                    .transition_with(
                        job_id,
                        Actor::Chunking,
                        JobStatus::Chunking,
                        JobStatus::ChunkingFailed,
                        StatusUpdate {
                            message: Some("splitting failed"),
                            error: Some(&reason),
                        },
                    )
                    .await?;
                self.emit_job(job_id, JobStatus::ChunkingFailed, &reason)
                    .await;
                return Ok(());
            }
        };

        let total = units.len() as i64;
        let inserted = self
            .persist("insert units", self.db.insert_units(job_id, &units))
            .await?;
        self.persist("set unit total", self.db.set_total_units(job_id, total))
            .await?;

        tracing::info!(
            job_id = %job_id,
            units = total,
            inserted,
            chars = text.chars().count(),
            "Source chunked"
        );

        self.registry
            .transition_with(
                job_id,
                Actor::Chunking,
                JobStatus::Chunking,
                JobStatus::ChunkingComplete,
                StatusUpdate {
                    message: Some(&format!("{} units", total)),
                    error: None,
                },
            )
            .await?;

        self.finish_chunking(job_id, total).await
    }

    /// Move a `chunking_complete` job on: straight to `completed` when there are no units,
    /// otherwise to `queued_for_analysis` with one message per open unit
    async fn finish_chunking(&self, job_id: JobId, total: i64) -> Result<()> {
        let moved = if total == 0 {
            self.registry
                .transition_with(
                    job_id,
                    Actor::Chunking,
                    JobStatus::ChunkingComplete,
                    JobStatus::Completed,
                    StatusUpdate {
                        message: Some("source contained no text"),
                        error: None,
                    },
                )
                .await
        } else {
            self.registry
                .transition(
                    job_id,
                    Actor::Chunking,
                    JobStatus::ChunkingComplete,
                    JobStatus::QueuedForAnalysis,
                )
                .await
        };

        match moved {
            Ok(()) => {}
            Err(Error::InvalidTransition { from, .. }) => {
                tracing::debug!(job_id = %job_id, status = %from, "Chunking already finished by another worker");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if total == 0 {
            self.emit_job(job_id, JobStatus::Completed, "source contained no text")
                .await;
            return Ok(());
        }

        self.enqueue_open_units(job_id).await
    }

    /// Publish one `analyze_unit` per unit that is not yet done
    async fn enqueue_open_units(&self, job_id: JobId) -> Result<()> {
        let units = self.db.list_units(job_id).await?;
        let mut enqueued = 0usize;

        for unit in units
            .iter()
            .filter(|unit| unit.unit_status() != UnitStatus::Done)
        {
            self.queue
                .enqueue(&StreamMessage::AnalyzeUnit {
                    job_id,
                    unit_index: unit.unit_index,
                })
                .await?;
            enqueued += 1;
        }

        tracing::info!(job_id = %job_id, enqueued, "Queued units for analysis");
        self.emit_job(
            job_id,
            JobStatus::QueuedForAnalysis,
            &format!("{} units queued for analysis", enqueued),
        )
        .await;
        Ok(())
    }
}
