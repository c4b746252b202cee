//! Consumer-group loops: pull deliveries for one stage and dispatch them to the handlers.
//!
//! An entry is acknowledged only after its handler returned, which means its effects are
//! durable. Handler errors leave the entry pending so another consumer claims it after
//! the claim timeout. Entries that can never succeed are dead-lettered instead.

use tokio_util::sync::CancellationToken;

use crate::error::{Error, QueueError, Result};
use crate::queue::{Delivery, StreamMessage};
use crate::types::Stage;

use super::Pipeline;

/// Errors that will fail the same way on every redelivery
fn is_poison(error: &Error) -> bool {
    matches!(
        error,
        Error::Validation(_)
            | Error::NotFound(_)
            | Error::Chunking(_)
            | Error::Queue(QueueError::InvalidMessage(_))
            | Error::Queue(QueueError::UnsupportedVersion { .. })
    )
}

/// The pending entry a handler is working under
pub(crate) struct Claim<'a> {
    pub(crate) stage: Stage,
    pub(crate) consumer: &'a str,
    pub(crate) entry_id: i64,
}

impl Pipeline {
    /// Consume `stage`'s stream as `consumer` until `cancel` fires
    ///
    /// Each round first reclaims entries abandoned by crashed consumers, then blocks for
    /// new ones. A read is never interrupted mid-way; cancellation is observed between
    /// reads and between deliveries.
    pub(crate) async fn run_consumer(&self, stage: Stage, consumer: String, cancel: CancellationToken) {
        let stream = stage.stream();
        let group = stage.group();
        let queue_config = &self.config.queue;

        tracing::info!(%stage, stream, group, consumer = %consumer, "Consumer started");

        while !cancel.is_cancelled() {
            let batch = match self.next_batch(stage, &consumer).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(stream, group, consumer = %consumer, error = %e, "Failed to read from stream");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(queue_config.poll_interval) => continue,
                    }
                }
            };

            for delivery in batch {
                if cancel.is_cancelled() {
                    // Left pending; reclaimed by the next consumer after the claim timeout
                    break;
                }
                self.handle_delivery(stage, &consumer, delivery, &cancel)
                    .await;
            }
        }

        tracing::info!(%stage, consumer = %consumer, "Consumer stopped");
    }

    async fn next_batch(&self, stage: Stage, consumer: &str) -> Result<Vec<Delivery>> {
        let queue_config = &self.config.queue;

        let claimed = self
            .queue
            .claim_stale(
                stage.stream(),
                stage.group(),
                consumer,
                queue_config.claim_timeout,
                queue_config.batch_size,
            )
            .await?;
        if !claimed.is_empty() {
            tracing::info!(
                stream = stage.stream(),
                consumer,
                count = claimed.len(),
                "Reclaimed stale entries"
            );
            return Ok(claimed);
        }

        self.queue
            .read_group(
                stage.stream(),
                stage.group(),
                consumer,
                queue_config.batch_size,
                queue_config.block_timeout,
            )
            .await
    }

    /// Process one delivery and acknowledge, dead-letter or leave it pending
    pub(crate) async fn handle_delivery(
        &self,
        stage: Stage,
        consumer: &str,
        delivery: Delivery,
        cancel: &CancellationToken,
    ) {
        let stream = stage.stream();
        let group = stage.group();
        let max_deliveries = self.config.queue.max_deliveries;

        if delivery.delivery_count > max_deliveries {
            let reason = format!(
                "delivered {} times (limit {})",
                delivery.delivery_count, max_deliveries
            );
            self.dead_letter(stage, &delivery, &reason).await;
            return;
        }

        let message = match StreamMessage::decode(&delivery.payload) {
            Ok(message) if message.stage() == stage => message,
            Ok(message) => {
                let reason = format!("{} message on the {} stream", message.kind(), stream);
                self.dead_letter(stage, &delivery, &reason).await;
                return;
            }
            Err(e) => {
                self.dead_letter(stage, &delivery, &e.to_string()).await;
                return;
            }
        };

        let job_id = message.job_id();
        tracing::debug!(
            stream,
            consumer,
            entry_id = delivery.entry_id,
            delivery_count = delivery.delivery_count,
            kind = message.kind(),
            job_id = %job_id,
            "Handling message"
        );

        let claim = Claim {
            stage,
            consumer,
            entry_id: delivery.entry_id,
        };

        match self.dispatch(&message, &claim, cancel).await {
            Ok(()) => {
                if let Err(e) = self.queue.ack(stream, group, delivery.entry_id).await {
                    tracing::error!(stream, entry_id = delivery.entry_id, error = %e, "Failed to acknowledge entry");
                }
            }
            Err(e) if is_poison(&e) => {
                self.dead_letter(stage, &delivery, &e.to_string()).await;
            }
            Err(Error::Queue(QueueError::ClaimLost { .. })) => {
                tracing::warn!(stream, entry_id = delivery.entry_id, job_id = %job_id, consumer, "Entry was claimed by another consumer, leaving it to them");
            }
            Err(Error::ShuttingDown) => {
                tracing::info!(stream, entry_id = delivery.entry_id, job_id = %job_id, "Interrupted by shutdown, leaving entry pending");
            }
            Err(e) => {
                tracing::warn!(
                    stream,
                    entry_id = delivery.entry_id,
                    job_id = %job_id,
                    kind = message.kind(),
                    error = %e,
                    "Handler failed, entry left pending for redelivery"
                );
            }
        }
    }

    async fn dispatch(
        &self,
        message: &StreamMessage,
        claim: &Claim<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match message {
            StreamMessage::ChunkSource { job_id, object_key } => {
                self.handle_chunk_source(*job_id, object_key).await
            }
            StreamMessage::AnalyzeUnit { job_id, unit_index } => {
                self.handle_analyze_unit(*job_id, *unit_index).await
            }
            StreamMessage::ResumeAnalysis { job_id } => {
                let run = self
                    .analyze_from_checkpoint(*job_id, cancel, Some(claim))
                    .await?;
                if run.cancelled {
                    return Err(Error::ShuttingDown);
                }
                Ok(())
            }
            StreamMessage::GenerateGraph { job_id } => self.handle_generate_graph(*job_id).await,
        }
    }

    /// Reset the idle clock of the entry behind `claim`
    ///
    /// Fails with [`QueueError::ClaimLost`] once another consumer has taken the entry.
    /// Storage errors are only logged; the next extension tries again.
    pub(crate) async fn extend_claim(&self, claim: &Claim<'_>) -> Result<()> {
        let stream = claim.stage.stream();
        match self
            .queue
            .extend_claim(stream, claim.stage.group(), claim.consumer, claim.entry_id)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(QueueError::ClaimLost {
                stream: stream.to_string(),
                entry_id: claim.entry_id,
            }
            .into()),
            Err(e) => {
                tracing::warn!(stream, entry_id = claim.entry_id, error = %e, "Failed to extend claim");
                Ok(())
            }
        }
    }

    async fn dead_letter(&self, stage: Stage, delivery: &Delivery, reason: &str) {
        tracing::warn!(
            stream = stage.stream(),
            entry_id = delivery.entry_id,
            delivery_count = delivery.delivery_count,
            reason,
            "Dead-lettering entry"
        );
        if let Err(e) = self
            .queue
            .dead_letter(stage.stream(), stage.group(), delivery, reason)
            .await
        {
            tracing::error!(stream = stage.stream(), entry_id = delivery.entry_id, error = %e, "Failed to dead-letter entry");
        }
    }
}
