//! Analysis stage: per-unit processing, checkpointed resume and job reconciliation.

use tokio_util::sync::CancellationToken;

use crate::analysis::AnalysisRequest;
use crate::db::{StatusUpdate, UnitRow};
use crate::error::{AnalysisError, Error, Result};
use crate::queue::StreamMessage;
use crate::types::{Actor, JobId, JobStatus, Stage, UnitEvent, UnitStatus};

use super::Pipeline;
use super::consumer::Claim;

/// What happened to one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// A result already existed; analysis was not invoked
    Skipped,
    /// Analysis succeeded and the result is durable
    Completed,
    /// Analysis failed and the unit is in `error`
    Failed,
    /// Another worker is inside its analysis call for this unit
    InFlight,
}

/// Summary of a [`Pipeline::run_checkpointed`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisRun {
    /// Index the pass started from
    pub start_index: i64,
    /// Units analyzed successfully during this pass
    pub analyzed: usize,
    /// Units that already had a result
    pub skipped: usize,
    /// Units whose analysis failed
    pub failed: usize,
    /// Units left to the worker already analyzing them
    pub in_flight: usize,
    /// Status the job was reconciled to, if this pass settled it
    pub final_status: Option<JobStatus>,
    /// The pass stopped early on cancellation
    pub cancelled: bool,
}

impl Pipeline {
    /// Make sure the job is in `analyzing`, taking it there from `queued_for_analysis`
    ///
    /// Returns `false` when the job is in any other state; messages for it are stale. A job
    /// found in `analysis_complete` gets graph generation queued again, since the worker that
    /// settled it may have died before queueing it.
    pub(crate) async fn begin_analysis(&self, job_id: JobId) -> Result<bool> {
        match self.registry.row(job_id).await?.status {
            JobStatus::Analyzing => Ok(true),
            JobStatus::AnalysisComplete => {
                tracing::info!(job_id = %job_id, "Analysis already complete, queueing graph generation again");
                self.queue
                    .enqueue(&StreamMessage::GenerateGraph { job_id })
                    .await?;
                Ok(false)
            }
            JobStatus::QueuedForAnalysis => {
                match self
                    .registry
                    .transition(
                        job_id,
                        Actor::Analysis,
                        JobStatus::QueuedForAnalysis,
                        JobStatus::Analyzing,
                    )
                    .await
                {
                    Ok(()) => {
                        self.emit_job(job_id, JobStatus::Analyzing, "analysis started")
                            .await;
                        Ok(true)
                    }
                    // Another worker moved it first
                    Err(Error::InvalidTransition {
                        from: JobStatus::Analyzing,
                        ..
                    }) => Ok(true),
                    Err(Error::InvalidTransition { from, .. }) => {
                        tracing::debug!(job_id = %job_id, status = %from, "Job left analysis while starting");
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            }
            other => {
                tracing::debug!(job_id = %job_id, status = %other, "Job is not being analyzed");
                Ok(false)
            }
        }
    }

    /// Analyze one unit unless it already has a result
    ///
    /// Analysis failures are recorded on the unit and reported as [`UnitOutcome::Failed`].
    /// Failing to persist the outcome is an error: the caller must not acknowledge the
    /// message that asked for this unit.
    pub async fn process_unit(&self, job_id: JobId, unit_index: i64) -> Result<UnitOutcome> {
        let unit = self
            .db
            .get_unit(job_id, unit_index)
            .await?
            .ok_or_else(|| Error::NotFound(format!("unit {} of job {}", unit_index, job_id)))?;

        if unit.unit_status() == UnitStatus::Done {
            self.report_skipped(job_id, &unit).await?;
            return Ok(UnitOutcome::Skipped);
        }

        let timeout = self.config.worker.analysis_timeout;
        if !self
            .persist(
                "mark unit processing",
                self.db.mark_unit_processing(job_id, unit_index, timeout),
            )
            .await?
        {
            let current = self.db.get_unit(job_id, unit_index).await?;
            if current.is_some_and(|u| u.unit_status() == UnitStatus::Done) {
                // Finished by a concurrent delivery in between
                self.report_skipped(job_id, &unit).await?;
                return Ok(UnitOutcome::Skipped);
            }
            tracing::debug!(job_id = %job_id, unit_index, "Unit is being analyzed by another worker");
            return Ok(UnitOutcome::InFlight);
        }

        let request = AnalysisRequest {
            job_id,
            unit_id: unit.id.clone(),
            unit_index,
            title: unit.title.clone(),
            text: unit.text.clone(),
        };

        let analyzed = match tokio::time::timeout(timeout, self.analyzer.analyze(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout(timeout)),
        };

        match analyzed {
            Ok(result) => {
                let stored = self
                    .persist(
                        "store unit result",
                        self.db.complete_unit(job_id, unit_index, &result),
                    )
                    .await?;
                if !stored {
                    self.report_skipped(job_id, &unit).await?;
                    return Ok(UnitOutcome::Skipped);
                }

                self.advance_checkpoint(job_id, Stage::Analysis).await;
                let counts = self.db.refresh_unit_counts(job_id).await?;

                tracing::debug!(
                    job_id = %job_id,
                    unit_index,
                    unit_id = %unit.id,
                    processed = counts.0,
                    total = counts.1,
                    "Unit analyzed"
                );
                self.emit_unit(
                    job_id,
                    counts,
                    UnitEvent {
                        unit_id: unit.id,
                        unit_index,
                        status: UnitStatus::Done,
                        data: Some(result),
                        message: None,
                    },
                    "unit analyzed",
                );
                Ok(UnitOutcome::Completed)
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(
                    job_id = %job_id,
                    unit_index,
                    unit_id = %unit.id,
                    analyzer = self.analyzer.name(),
                    error = %e,
                    "Unit analysis failed"
                );

                self.persist(
                    "store unit error",
                    self.db.fail_unit(job_id, unit_index, &reason),
                )
                .await?;
                let counts = self.db.refresh_unit_counts(job_id).await?;

                self.emit_unit(
                    job_id,
                    counts,
                    UnitEvent {
                        unit_id: unit.id,
                        unit_index,
                        status: UnitStatus::Error,
                        data: None,
                        message: Some(reason),
                    },
                    "unit analysis failed",
                );
                Ok(UnitOutcome::Failed)
            }
        }
    }

    async fn report_skipped(&self, job_id: JobId, unit: &UnitRow) -> Result<()> {
        let counts = self.db.refresh_unit_counts(job_id).await?;
        tracing::debug!(
            job_id = %job_id,
            unit_index = unit.unit_index,
            "Unit already analyzed, skipping"
        );
        self.emit_unit(
            job_id,
            counts,
            UnitEvent {
                unit_id: unit.id.clone(),
                unit_index: unit.unit_index,
                status: UnitStatus::Done,
                data: None,
                message: Some("already analyzed".into()),
            },
            "unit already analyzed",
        );
        Ok(())
    }

    /// Move the stage checkpoint up to the current contiguous done prefix
    ///
    /// Failures are logged only; the unit table stays the authority.
    pub(crate) async fn advance_checkpoint(&self, job_id: JobId, stage: Stage) {
        match self
            .persist("advance checkpoint", self.db.sync_checkpoint(job_id, stage))
            .await
        {
            Ok(Some(index)) => {
                tracing::debug!(job_id = %job_id, %stage, last_processed_index = index, "Checkpoint advanced");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(job_id = %job_id, %stage, error = %e, "Failed to write checkpoint");
            }
        }
    }

    /// Analyze every unit of a job after its checkpoint, in index order
    ///
    /// Cancellation is checked between units. Once every unit is terminal the job is
    /// reconciled.
    pub async fn run_checkpointed(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
    ) -> Result<AnalysisRun> {
        self.analyze_from_checkpoint(job_id, cancel, None).await
    }

    /// [`run_checkpointed`](Self::run_checkpointed) under a queue claim
    ///
    /// The claim is extended before every unit so the entry is not handed to another
    /// consumer while this pass is still working through it. Losing the claim ends the pass
    /// with [`QueueError::ClaimLost`](crate::error::QueueError::ClaimLost).
    pub(crate) async fn analyze_from_checkpoint(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
        claim: Option<&Claim<'_>>,
    ) -> Result<AnalysisRun> {
        let mut run = AnalysisRun::default();

        if !self.begin_analysis(job_id).await? {
            return Ok(run);
        }

        run.start_index = self
            .db
            .get_checkpoint(job_id, Stage::Analysis)
            .await?
            .map_or(0, |checkpoint| checkpoint.last_processed_index + 1);

        let units = self.db.list_units_from(job_id, run.start_index).await?;
        tracing::info!(
            job_id = %job_id,
            start_index = run.start_index,
            remaining = units.len(),
            "Resuming analysis from checkpoint"
        );

        for unit in units {
            if cancel.is_cancelled() {
                tracing::info!(job_id = %job_id, next_index = unit.unit_index, "Analysis pass cancelled");
                run.cancelled = true;
                return Ok(run);
            }
            if let Some(claim) = claim {
                self.extend_claim(claim).await?;
            }

            match self.process_unit(job_id, unit.unit_index).await? {
                UnitOutcome::Completed => run.analyzed += 1,
                UnitOutcome::Skipped => run.skipped += 1,
                UnitOutcome::Failed => run.failed += 1,
                UnitOutcome::InFlight => run.in_flight += 1,
            }
        }

        run.final_status = self.reconcile_analysis(job_id).await?;
        Ok(run)
    }

    /// Handle an `analyze_unit` message
    ///
    /// A unit another worker is analyzing is left to that worker, which reconciles the job
    /// when it finishes.
    pub(crate) async fn handle_analyze_unit(&self, job_id: JobId, unit_index: i64) -> Result<()> {
        if !self.begin_analysis(job_id).await? {
            return Ok(());
        }

        self.process_unit(job_id, unit_index).await?;
        self.reconcile_analysis(job_id).await?;
        Ok(())
    }

    /// Settle the analysis stage once no unit is pending or processing
    ///
    /// `analysis_complete` requires every unit `done`; any unit in `error` makes it
    /// `analysis_failed`. Only one caller wins the transition. The winner of
    /// `analysis_complete` enqueues graph generation.
    pub async fn reconcile_analysis(&self, job_id: JobId) -> Result<Option<JobStatus>> {
        let (open, done, failed) = self.db.unit_status_counts(job_id).await?;
        if open > 0 {
            return Ok(None);
        }

        let (target, update) = if failed == 0 {
            (
                JobStatus::AnalysisComplete,
                StatusUpdate {
                    message: Some("all units analyzed"),
                    error: None,
                },
            )
        } else {
            (
                JobStatus::AnalysisFailed,
                StatusUpdate {
                    message: Some("some units failed analysis"),
                    error: Some("one or more units failed analysis"),
                },
            )
        };

        match self
            .registry
            .transition_with(job_id, Actor::Analysis, JobStatus::Analyzing, target, update)
            .await
        {
            Ok(()) => {}
            Err(Error::InvalidTransition { from, .. }) => {
                tracing::debug!(job_id = %job_id, status = %from, "Analysis already reconciled");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        tracing::info!(job_id = %job_id, done, failed, status = %target, "Analysis stage settled");

        if target == JobStatus::AnalysisComplete {
            self.queue
                .enqueue(&StreamMessage::GenerateGraph { job_id })
                .await?;
            self.emit_job(job_id, target, "all units analyzed, graph queued")
                .await;
        } else {
            self.emit_job(
                job_id,
                target,
                &format!("{} of {} units failed analysis", failed, done + failed),
            )
            .await;
        }

        Ok(Some(target))
    }
}
