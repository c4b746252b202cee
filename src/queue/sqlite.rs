//! SQLite-backed stream queue
//!
//! Streams live in the pipeline database next to the job tables, so any number of
//! processes pointed at the same file share one set of consumer groups. Delivery and
//! claiming run inside `BEGIN IMMEDIATE`, which takes SQLite's write lock up front: two
//! consumers can never select the same entry before either has recorded it as pending.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, SqliteConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::QueueConfig;
use crate::db::Database;
use crate::error::{Error, QueueError, Result};

use super::message::StreamMessage;
use super::traits::{Delivery, StreamQueue};

/// Entry that was moved out of a group's pending set for good
#[derive(Debug, Clone, FromRow)]
pub struct DeadLetter {
    /// Original entry id
    pub entry_id: i64,
    /// Group the entry was pending in
    pub group_name: String,
    /// Raw payload
    pub payload: String,
    /// Why it was dead-lettered
    pub reason: String,
    /// Deliveries before giving up
    pub delivery_count: i64,
    /// Unix timestamp
    pub failed_at: i64,
}

/// [`StreamQueue`] over the `stream_*` tables
#[derive(Clone)]
pub struct SqliteStreamQueue {
    pool: SqlitePool,
    notify: Arc<Notify>,
    poll_interval: Duration,
}

impl SqliteStreamQueue {
    /// Create a queue on an existing pool
    pub fn new(pool: SqlitePool, config: &QueueConfig) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
            poll_interval: config.poll_interval,
        }
    }

    /// Create a queue sharing the pipeline database
    pub fn from_database(db: &Database, config: &QueueConfig) -> Self {
        Self::new(db.pool().clone(), config)
    }

    /// Append an already-encoded payload
    ///
    /// [`StreamQueue::publish`] is the normal entry point; this one skips encoding so
    /// foreign producers can be simulated.
    pub async fn publish_raw(&self, stream: &str, payload: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "INSERT INTO stream_entries (stream, payload, created_at) VALUES (?, ?, ?)",
        )
        .bind(stream)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::PublishFailed {
            stream: stream.to_string(),
            reason: e.to_string(),
        })?;

        let entry_id = result.last_insert_rowid();
        self.notify.notify_waiters();

        tracing::debug!(stream, entry_id, "Published stream entry");
        Ok(entry_id)
    }

    /// Dead-lettered entries of a stream, oldest first
    pub async fn dead_letters(&self, stream: &str) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query_as::<_, DeadLetter>(
            r#"
            SELECT entry_id, group_name, payload, reason, delivery_count, failed_at
            FROM stream_dead_letters WHERE stream = ? ORDER BY id
            "#,
        )
        .bind(stream)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_failed(stream, e))?;

        Ok(rows)
    }

    /// One non-blocking delivery attempt
    async fn try_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<Delivery>> {
        let mut conn = self.pool.acquire().await.map_err(|e| read_failed(stream, e))?;
        begin_immediate(&mut conn, stream).await?;

        let result: Result<Vec<Delivery>> = async {
            let last_delivered = group_cursor(&mut conn, stream, group).await?;

            let entries: Vec<(i64, String)> = sqlx::query_as(
                r#"
                SELECT id, payload FROM stream_entries
                WHERE stream = ? AND id > ?
                ORDER BY id
                LIMIT ?
                "#,
            )
            .bind(stream)
            .bind(last_delivered)
            .bind(count as i64)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| read_failed(stream, e))?;

            let Some((newest, _)) = entries.last() else {
                return Ok(Vec::new());
            };
            let newest = *newest;
            let now_ms = chrono::Utc::now().timestamp_millis();

            for (entry_id, _) in &entries {
                sqlx::query(
                    r#"
                    INSERT INTO stream_pending
                        (stream, group_name, entry_id, consumer, delivered_at_ms, delivery_count)
                    VALUES (?, ?, ?, ?, ?, 1)
                    "#,
                )
                .bind(stream)
                .bind(group)
                .bind(entry_id)
                .bind(consumer)
                .bind(now_ms)
                .execute(&mut *conn)
                .await
                .map_err(|e| read_failed(stream, e))?;
            }

            sqlx::query(
                "UPDATE stream_groups SET last_delivered_id = ? WHERE stream = ? AND group_name = ?",
            )
            .bind(newest)
            .bind(stream)
            .bind(group)
            .execute(&mut *conn)
            .await
            .map_err(|e| read_failed(stream, e))?;

            Ok(entries
                .into_iter()
                .map(|(entry_id, payload)| Delivery {
                    entry_id,
                    payload,
                    delivery_count: 1,
                })
                .collect())
        }
        .await;

        finish(&mut conn, stream, result).await
    }
}

#[async_trait]
impl StreamQueue for SqliteStreamQueue {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO stream_groups (stream, group_name, last_delivered_id, created_at)
            VALUES (?, ?, 0, ?)
            "#,
        )
        .bind(stream)
        .bind(group)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(stream, group, "Created consumer group");
                Ok(())
            }
            Err(e)
                if e.as_database_error()
                    .is_some_and(|db| db.is_unique_violation()) =>
            {
                tracing::debug!(stream, group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(QueueError::SetupFailed {
                stream: stream.to_string(),
                group: group.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    async fn publish(&self, stream: &str, message: &StreamMessage) -> Result<i64> {
        let payload = message.encode()?;
        self.publish_raw(stream, &payload).await
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + block;

        loop {
            // Registered before the read so a publish in between still wakes us
            let notified = self.notify.notified();

            let batch = self.try_read(stream, group, consumer, count).await?;
            if !batch.is_empty() {
                tracing::debug!(stream, group, consumer, count = batch.len(), "Delivered entries");
                return Ok(batch);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(batch);
            }

            // Other processes publish without notifying us, so poll as well
            let wait = (deadline - now).min(self.poll_interval);
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<Delivery>> {
        let mut conn = self.pool.acquire().await.map_err(|e| read_failed(stream, e))?;
        begin_immediate(&mut conn, stream).await?;

        let result: Result<Vec<Delivery>> = async {
            group_cursor(&mut conn, stream, group).await?;

            let now_ms = chrono::Utc::now().timestamp_millis();
            let idle_before = now_ms - i64::try_from(min_idle.as_millis()).unwrap_or(i64::MAX);

            let stale: Vec<(i64, String, i64)> = sqlx::query_as(
                r#"
                SELECT p.entry_id, e.payload, p.delivery_count
                FROM stream_pending p
                JOIN stream_entries e ON e.id = p.entry_id
                WHERE p.stream = ? AND p.group_name = ? AND p.delivered_at_ms <= ?
                ORDER BY p.entry_id
                LIMIT ?
                "#,
            )
            .bind(stream)
            .bind(group)
            .bind(idle_before)
            .bind(count as i64)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| read_failed(stream, e))?;

            let mut claimed = Vec::with_capacity(stale.len());
            for (entry_id, payload, delivery_count) in stale {
                sqlx::query(
                    r#"
                    UPDATE stream_pending
                    SET consumer = ?, delivered_at_ms = ?, delivery_count = delivery_count + 1
                    WHERE stream = ? AND group_name = ? AND entry_id = ?
                    "#,
                )
                .bind(consumer)
                .bind(now_ms)
                .bind(stream)
                .bind(group)
                .bind(entry_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| read_failed(stream, e))?;

                claimed.push(Delivery {
                    entry_id,
                    payload,
                    delivery_count: delivery_count + 1,
                });
            }

            Ok(claimed)
        }
        .await;

        let claimed = finish(&mut conn, stream, result).await?;
        if !claimed.is_empty() {
            tracing::info!(
                stream,
                group,
                consumer,
                count = claimed.len(),
                "Claimed stale entries from idle consumers"
            );
        }
        Ok(claimed)
    }

    async fn extend_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        entry_id: i64,
    ) -> Result<bool> {
        let now_ms = chrono::Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            UPDATE stream_pending SET delivered_at_ms = ?
            WHERE stream = ? AND group_name = ? AND entry_id = ? AND consumer = ?
            "#,
        )
        .bind(now_ms)
        .bind(stream)
        .bind(group)
        .bind(entry_id)
        .bind(consumer)
        .execute(&self.pool)
        .await
        .map_err(|e| read_failed(stream, e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM stream_pending WHERE stream = ? AND group_name = ? AND entry_id = ?",
        )
        .bind(stream)
        .bind(group)
        .bind(entry_id)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::AckFailed {
            stream: stream.to_string(),
            entry_id,
            reason: e.to_string(),
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn dead_letter(
        &self,
        stream: &str,
        group: &str,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<()> {
        let ack_failed = |e: sqlx::Error| -> Error {
            QueueError::AckFailed {
                stream: stream.to_string(),
                entry_id: delivery.entry_id,
                reason: e.to_string(),
            }
            .into()
        };

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(ack_failed)?;

        sqlx::query(
            r#"
            INSERT INTO stream_dead_letters
                (stream, group_name, entry_id, payload, reason, delivery_count, failed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stream)
        .bind(group)
        .bind(delivery.entry_id)
        .bind(&delivery.payload)
        .bind(reason)
        .bind(delivery.delivery_count)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(ack_failed)?;

        sqlx::query(
            "DELETE FROM stream_pending WHERE stream = ? AND group_name = ? AND entry_id = ?",
        )
        .bind(stream)
        .bind(group)
        .bind(delivery.entry_id)
        .execute(&mut *tx)
        .await
        .map_err(ack_failed)?;

        tx.commit().await.map_err(ack_failed)?;

        tracing::warn!(
            stream,
            group,
            entry_id = delivery.entry_id,
            deliveries = delivery.delivery_count,
            reason,
            "Dead-lettered stream entry"
        );
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stream_pending WHERE stream = ? AND group_name = ?",
        )
        .bind(stream)
        .bind(group)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| read_failed(stream, e))?;

        Ok(count)
    }
}

fn read_failed(stream: &str, e: sqlx::Error) -> Error {
    QueueError::ReadFailed {
        stream: stream.to_string(),
        reason: e.to_string(),
    }
    .into()
}

async fn begin_immediate(conn: &mut SqliteConnection, stream: &str) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(|e| read_failed(stream, e))?;
    Ok(())
}

/// Current delivery cursor of a group, or `GroupNotFound`
async fn group_cursor(conn: &mut SqliteConnection, stream: &str, group: &str) -> Result<i64> {
    let cursor: Option<i64> = sqlx::query_scalar(
        "SELECT last_delivered_id FROM stream_groups WHERE stream = ? AND group_name = ?",
    )
    .bind(stream)
    .bind(group)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| read_failed(stream, e))?;

    cursor.ok_or_else(|| {
        QueueError::GroupNotFound {
            stream: stream.to_string(),
            group: group.to_string(),
        }
        .into()
    })
}

/// Commit on success, roll back on failure
async fn finish<T>(conn: &mut SqliteConnection, stream: &str, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(|e| read_failed(stream, e))?;
            Ok(value)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}
