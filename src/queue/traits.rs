//! The stream queue seam

use async_trait::async_trait;
use std::time::Duration;

use super::message::StreamMessage;

/// One entry handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream-wide entry id, used to acknowledge
    pub entry_id: i64,
    /// Raw payload, decoded by the consumer
    pub payload: String,
    /// How many times this entry has been handed out, this delivery included
    pub delivery_count: i64,
}

/// Durable append-only streams read through consumer groups
///
/// Within a group every entry is delivered to exactly one consumer at a time, and stays
/// pending until [`ack`](StreamQueue::ack)ed. Delivery is at-least-once: consumers must
/// tolerate seeing an entry again after a crash or a claim-timeout redelivery.
#[async_trait]
pub trait StreamQueue: Send + Sync {
    /// Create a consumer group on a stream
    ///
    /// Succeeds if the group already exists. Any other failure is
    /// [`QueueError::SetupFailed`](crate::error::QueueError::SetupFailed).
    async fn ensure_group(&self, stream: &str, group: &str) -> crate::Result<()>;

    /// Append a message, returning its entry id
    async fn publish(&self, stream: &str, message: &StreamMessage) -> crate::Result<i64>;

    /// Deliver up to `count` never-delivered entries to `consumer`
    ///
    /// Waits up to `block` for new entries when none are available, returning an empty
    /// batch on timeout.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> crate::Result<Vec<Delivery>>;

    /// Take over up to `count` pending entries that have been idle for at least `min_idle`
    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> crate::Result<Vec<Delivery>>;

    /// Reset the idle time of an entry `consumer` still holds
    ///
    /// Long-running handlers call this so [`claim_stale`](StreamQueue::claim_stale) does not
    /// hand their entry to another consumer. Returns `false` if the entry is no longer
    /// pending for `consumer`.
    async fn extend_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        entry_id: i64,
    ) -> crate::Result<bool>;

    /// Remove an entry from the group's pending set
    ///
    /// Returns `false` if the entry was not pending (already acknowledged or dead-lettered).
    async fn ack(&self, stream: &str, group: &str, entry_id: i64) -> crate::Result<bool>;

    /// Move a pending entry to the dead-letter table
    async fn dead_letter(
        &self,
        stream: &str,
        group: &str,
        delivery: &Delivery,
        reason: &str,
    ) -> crate::Result<()>;

    /// Number of delivered but unacknowledged entries in a group
    async fn pending_count(&self, stream: &str, group: &str) -> crate::Result<i64>;

    /// Publish a message on the stream of the stage that handles it
    async fn enqueue(&self, message: &StreamMessage) -> crate::Result<i64> {
        self.publish(message.stage().stream(), message).await
    }
}
