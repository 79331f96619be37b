//! A Postgres-backed bounded FIFO queue, grounded on
//! `hook_common::pgqueue`. Unlike that queue's per-row job-status state
//! machine, this one is a plain ordered buffer: events are appended,
//! dequeued in order and deleted, with no retry bookkeeping — a worker
//! that fails a batch simply abandons it.
//!
//! The size guard is the one piece that must be atomic: a naive
//! check-then-push lets `K` concurrent enqueuers exceed the cap by up to
//! `K`. Here the check and the push happen inside one transaction that
//! locks a singleton counter row with `SELECT ... FOR UPDATE`, so
//! concurrent callers serialize on that row rather than racing.

use analytics_common::event::Event;
use sqlx::postgres::PgPool;
use sqlx::Row;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to decode queued event: {0}")]
    Decode(#[from] serde_json::Error),
}

pub struct EventQueue {
    pool: PgPool,
    max_queue_size: i64,
}

impl EventQueue {
    pub fn new(pool: PgPool, max_queue_size: i64) -> Self {
        Self {
            pool,
            max_queue_size,
        }
    }

    /// Atomically enqueues the whole batch or none of it. Returns
    /// [`QueueError::Full`] without enqueuing anything if `depth +
    /// events.len()` would exceed `max_queue_size`.
    pub async fn enqueue_many(&self, events: &[Event]) -> Result<(), QueueError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let depth: i64 = sqlx::query_scalar(
            "SELECT depth FROM queue_state WHERE singleton = TRUE FOR UPDATE",
        )
        .fetch_one(&mut *tx)
        .await?;

        let incoming = events.len() as i64;
        if depth + incoming > self.max_queue_size {
            tx.rollback().await?;
            return Err(QueueError::Full);
        }

        for event in events {
            let payload = serde_json::to_value(event)?;
            sqlx::query("INSERT INTO event_queue (payload) VALUES ($1)")
                .bind(payload)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE queue_state SET depth = depth + $1 WHERE singleton = TRUE")
            .bind(incoming)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Dequeues and removes up to `n` events in FIFO order. Returns fewer
    /// than `n` if the queue holds fewer events.
    pub async fn dequeue_batch(&self, n: i64) -> Result<Vec<Event>, QueueError> {
        if n <= 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT id, payload FROM event_queue ORDER BY id ASC LIMIT $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(n)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|row| row.get("id")).collect();
        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let payload: serde_json::Value = row.get("payload");
            events.push(serde_json::from_value(payload)?);
        }

        sqlx::query("DELETE FROM event_queue WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE queue_state SET depth = depth - $1 WHERE singleton = TRUE")
            .bind(ids.len() as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(events)
    }

    pub async fn depth(&self) -> Result<i64, QueueError> {
        let depth: i64 =
            sqlx::query_scalar("SELECT depth FROM queue_state WHERE singleton = TRUE")
                .fetch_one(&self.pool)
                .await?;
        Ok(depth)
    }

    /// Test-only: empties the queue and resets the depth counter.
    pub async fn clear(&self) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM event_queue").execute(&mut *tx).await?;
        sqlx::query("UPDATE queue_state SET depth = 0 WHERE singleton = TRUE")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_common::event::{AnalyticsLevel, CoreFields, Status, ToolName};
    use chrono::{TimeZone, Utc};

    fn sample_event() -> Event {
        Event::Minimal {
            core: CoreFields {
                version: "1.0.0".to_string(),
                tool: ToolName::GetForecast,
                status: Status::Success,
                timestamp_hour: Utc.with_ymd_and_hms(2025, 11, 12, 20, 0, 0).unwrap(),
                analytics_level: AnalyticsLevel::Minimal,
            },
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn enqueue_then_dequeue_is_fifo(pool: PgPool) {
        let queue = EventQueue::new(pool, 1000);
        let first = sample_event();
        let second = sample_event();
        queue
            .enqueue_many(&[first.clone(), second.clone()])
            .await
            .expect("enqueue should succeed");
        assert_eq!(queue.depth().await.unwrap(), 2);

        let batch = queue.dequeue_batch(10).await.expect("dequeue should succeed");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], first);
        assert_eq!(batch[1], second);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn enqueue_rejects_when_batch_would_exceed_cap(pool: PgPool) {
        let queue = EventQueue::new(pool, 1);
        let events = vec![sample_event(), sample_event()];
        let result = queue.enqueue_many(&events).await;
        assert!(matches!(result, Err(QueueError::Full)));
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn dequeue_returns_fewer_than_requested_when_queue_is_short(pool: PgPool) {
        let queue = EventQueue::new(pool, 1000);
        queue.enqueue_many(&[sample_event()]).await.unwrap();
        let batch = queue.dequeue_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn clear_resets_depth(pool: PgPool) {
        let queue = EventQueue::new(pool, 1000);
        queue.enqueue_many(&[sample_event()]).await.unwrap();
        queue.clear().await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }
}
