//! The batch-draining worker loop, grounded on
//! `hook_worker::worker::WebhookWorker::run` for the poll/health-report
//! shape and on `hook_janitor::main`'s interval-gated loop for the
//! cancellation-token-driven shutdown.
//!
//! Unlike a webhook worker that spawns one task per job
//! under a concurrency-limiting semaphore, this worker processes one
//! batch at a time: it runs a single cooperative loop, and horizontal
//! scale comes from running multiple `analytics-worker` processes
//! against the same queue, not from intra-process concurrency.

use std::sync::Arc;
use std::time::Duration;

use analytics_aggregator::AggregatorStore;
use analytics_common::event::Event;
use analytics_queue::EventQueue;
use health::HealthHandle;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::WorkerError;

pub struct AnalyticsWorker {
    queue: Arc<EventQueue>,
    store: Arc<AggregatorStore>,
    batch_size: i64,
    poll_interval: Duration,
    liveness: HealthHandle,
}

impl AnalyticsWorker {
    pub fn new(
        queue: Arc<EventQueue>,
        store: Arc<AggregatorStore>,
        batch_size: i64,
        poll_interval: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            queue,
            store,
            batch_size,
            poll_interval,
            liveness,
        }
    }

    /// Runs the poll-and-drain loop until `shutdown` is signalled. On
    /// shutdown, a batch that was already dequeued is pushed back onto the
    /// queue rather than processed, so no in-flight batch is silently
    /// dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let batch = self.queue.dequeue_batch(self.batch_size).await?;

            if batch.is_empty() {
                self.liveness.report_healthy().await;
                interval.tick().await;
                continue;
            }

            if *shutdown.borrow() {
                self.reenqueue_on_shutdown(batch).await;
                return Ok(());
            }

            // A non-empty batch re-loops immediately; only an empty poll
            // waits out the fixed interval.
            self.process_batch(batch).await;
            self.liveness.report_healthy().await;
        }
    }

    /// Pushes a dequeued-but-not-yet-processed batch back onto the queue:
    /// a batch dequeued after the shutdown flag is set is re-enqueued
    /// rather than processed.
    async fn reenqueue_on_shutdown(&self, batch: Vec<Event>) {
        warn!(batch_size = batch.len(), "shutting down, re-enqueueing dequeued batch");
        if let Err(err) = self.queue.enqueue_many(&batch).await {
            error!(error = %err, "failed to re-enqueue batch during shutdown");
        }
    }

    /// Raw insert failure abandons the whole batch (it is lost,
    /// best-effort); aggregation failure is logged but does not undo the
    /// raw insert, since rollups are rebuildable from raw data.
    async fn process_batch(&self, batch: Vec<Event>) {
        let batch_len = batch.len();
        let started = tokio::time::Instant::now();

        match self.store.insert_raw_batch(&batch).await {
            Ok(()) => {
                metrics::counter!("analytics_worker_raw_inserted_total").increment(batch_len as u64);
            }
            Err(err) => {
                error!(error = %err, batch_size = batch_len, "raw insert failed, abandoning batch");
                metrics::counter!("analytics_worker_batches_abandoned_total").increment(1);
                return;
            }
        }

        match self.store.apply(&batch).await {
            Ok(()) => {
                metrics::counter!("analytics_worker_batches_aggregated_total").increment(1);
            }
            Err(err) => {
                error!(error = %err, batch_size = batch_len, "aggregation failed, rollups may be stale");
                metrics::counter!("analytics_worker_aggregation_failures_total").increment(1);
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        metrics::histogram!("analytics_worker_batch_duration_seconds").record(elapsed);
        info!(batch_size = batch_len, elapsed_seconds = elapsed, "processed batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_common::event::{AnalyticsLevel, CoreFields, Status, ToolName};
    use chrono::{TimeZone, Utc};
    use health::HealthRegistry;
    use sqlx::PgPool;

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

    async fn liveness_handle() -> (HealthRegistry, HealthHandle) {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("worker".to_string(), time::Duration::seconds(30))
            .await;
        (registry, handle)
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn drains_a_batch_into_raw_and_aggregate_stores(pool: PgPool) {
        let queue = Arc::new(EventQueue::new(pool.clone(), 1000));
        let store = Arc::new(AggregatorStore::new(pool.clone()));
        queue
            .enqueue_many(&[sample_event(), sample_event()])
            .await
            .unwrap();

        let (_registry, liveness) = liveness_handle().await;
        let worker = AnalyticsWorker::new(
            queue.clone(),
            store,
            10,
            Duration::from_millis(10),
            liveness,
        );

        let batch = worker.queue.dequeue_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        worker.process_batch(batch).await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn shutdown_re_enqueues_a_dequeued_batch_instead_of_processing_it(pool: PgPool) {
        // Simulates "worker has just dequeued a batch when SIGTERM arrives":
        // the batch leaves the queue, then the shutdown flag flips before
        // it is processed.
        let queue = Arc::new(EventQueue::new(pool.clone(), 1000));
        let store = Arc::new(AggregatorStore::new(pool.clone()));
        let batch = vec![sample_event(); 50];
        queue.enqueue_many(&batch).await.unwrap();

        let (_registry, liveness) = liveness_handle().await;
        let worker = AnalyticsWorker::new(queue.clone(), store, 100, Duration::from_millis(10), liveness);

        let dequeued = worker.queue.dequeue_batch(100).await.unwrap();
        assert_eq!(dequeued.len(), 50);
        assert_eq!(queue.depth().await.unwrap(), 0);

        worker.reenqueue_on_shutdown(dequeued).await;

        assert_eq!(queue.depth().await.unwrap(), 50);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
