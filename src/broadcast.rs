//! Per-job progress fanout
//!
//! A job has a topic (one `tokio::sync::broadcast` channel) only while somebody is
//! watching it: the first [`Observer`] creates the topic and dropping the last one removes
//! it. Publishing into a job nobody watches is a cheap no-op. Delivery is best effort with
//! no replay, so an observer that falls behind skips what it missed.

use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::config::BroadcastConfig;
use crate::types::{JobId, ProgressEvent};

struct Topic {
    /// Distinguishes a recreated topic from the one an old observer belonged to
    id: u64,
    tx: broadcast::Sender<ProgressEvent>,
    observers: usize,
}

struct Inner {
    topics: Mutex<HashMap<JobId, Topic>>,
    next_topic_id: AtomicU64,
    capacity: usize,
}

/// Reference-counted per-job pub/sub
#[derive(Clone)]
pub struct ProgressBroadcaster {
    inner: Arc<Inner>,
}

impl ProgressBroadcaster {
    /// Broadcaster whose topics buffer up to `capacity` events per observer
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                next_topic_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Broadcaster sized from config
    pub fn from_config(config: &BroadcastConfig) -> Self {
        Self::new(config.topic_capacity)
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<JobId, Topic>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start observing a job
    pub fn subscribe(&self, job_id: JobId) -> Observer {
        let mut topics = self.topics();
        let topic = topics.entry(job_id).or_insert_with(|| {
            let (tx, _) = broadcast::channel(self.inner.capacity);
            let id = self.inner.next_topic_id.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(job_id = %job_id, topic_id = id, "Created progress topic");
            Topic {
                id,
                tx,
                observers: 0,
            }
        });
        topic.observers += 1;

        Observer {
            job_id,
            topic_id: topic.id,
            stream: BroadcastStream::new(topic.tx.subscribe()),
            broadcaster: self.clone(),
            finished: false,
        }
    }

    /// Deliver an event to everyone observing its job
    ///
    /// Returns how many observers it reached. A settled event (completed, failed or a
    /// stage failure) closes the topic after delivery.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let job_id = event.job_id;
        let settled = event.status.is_settled();

        tracing::debug!(
            job_id = %job_id,
            status = %event.status,
            processed = event.processed_count,
            total = event.total_count,
            unit_index = event.unit_event.as_ref().map(|u| u.unit_index),
            message = %event.message,
            "Progress event"
        );

        let mut topics = self.topics();
        let Some(topic) = topics.get(&job_id) else {
            return 0;
        };

        let delivered = topic.tx.send(event).unwrap_or(0);

        if settled {
            // Dropping the sender ends every observer's stream after the buffered events
            topics.remove(&job_id);
            tracing::debug!(job_id = %job_id, "Closed progress topic on settled event");
        }

        delivered
    }

    /// Number of observers currently attached to a job
    pub fn observer_count(&self, job_id: JobId) -> usize {
        self.topics().get(&job_id).map_or(0, |topic| topic.observers)
    }

    /// Number of jobs with at least one observer
    pub fn topic_count(&self) -> usize {
        self.topics().len()
    }

    fn release(&self, job_id: JobId, topic_id: u64) {
        let mut topics = self.topics();
        if let Some(topic) = topics.get_mut(&job_id)
            && topic.id == topic_id
        {
            topic.observers = topic.observers.saturating_sub(1);
            if topic.observers == 0 {
                topics.remove(&job_id);
                tracing::debug!(job_id = %job_id, "Removed progress topic after last observer left");
            }
        }
    }
}

/// Stream of progress events for one job
///
/// Ends after yielding a settled event. Dropping it detaches the observer.
pub struct Observer {
    job_id: JobId,
    topic_id: u64,
    stream: BroadcastStream<ProgressEvent>,
    broadcaster: ProgressBroadcaster,
    finished: bool,
}

impl Observer {
    /// Job being observed
    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

impl Stream for Observer {
    type Item = ProgressEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if event.status.is_settled() {
                        this.finished = true;
                    }
                    return Poll::Ready(Some(event));
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    tracing::warn!(
                        job_id = %this.job_id,
                        skipped,
                        "Progress observer lagged, skipping missed events"
                    );
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.broadcaster.release(self.job_id, self.topic_id);
    }
}
