//! Turns a dequeued batch of [`Event`]s into three upsert paths: raw
//! insert, daily/hourly weighted re-averaging, and error summaries. All
//! three read from the same in-memory grouping
//! ([`grouping::group_batch`]) computed once per batch.

pub mod grouping;
pub mod percentile;

use analytics_common::event::Event;
use grouping::group_batch;
use sqlx::postgres::PgPool;
use thiserror::Error;

/// Distinguishes failures the worker should abandon-and-log (transient)
/// from ones that are fatal and alertable (persistent).
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("transient store error: {0}")]
    Transient(sqlx::Error),
    #[error("persistent store error: {0}")]
    Persistent(sqlx::Error),
}

impl From<sqlx::Error> for AggregationError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AggregationError::Transient(error)
            }
            _ => AggregationError::Persistent(error),
        }
    }
}

pub struct AggregatorStore {
    pool: PgPool,
}

impl AggregatorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The whole batch is one multi-row insert in one transaction.
    /// Partial batch insert is not permitted — this either inserts
    /// everything or nothing.
    pub async fn insert_raw_batch(&self, batch: &[Event]) -> Result<(), AggregationError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for event in batch {
            let core = event.core();
            let standard = event.standard();
            let detailed = event.detailed();
            let parameters = detailed.and_then(|d| {
                d.parameters
                    .as_ref()
                    .map(|p| serde_json::to_value(p).unwrap_or(serde_json::Value::Null))
            });

            sqlx::query(
                r#"
                INSERT INTO raw_events
                    (version, tool, status, timestamp_hour, analytics_level,
                     response_time_ms, service, cache_hit, retry_count, country, error_type,
                     parameters, session_id, sequence_number)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(&core.version)
            .bind(core.tool)
            .bind(core.status)
            .bind(core.timestamp_hour)
            .bind(core.analytics_level)
            .bind(standard.and_then(|s| s.response_time_ms))
            .bind(standard.and_then(|s| s.service))
            .bind(standard.and_then(|s| s.cache_hit))
            .bind(standard.and_then(|s| s.retry_count))
            .bind(standard.and_then(|s| s.country.clone()))
            .bind(standard.and_then(|s| s.error_type.clone()))
            .bind(parameters)
            .bind(detailed.and_then(|d| d.session_id.clone()))
            .bind(detailed.and_then(|d| d.sequence_number))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Daily, hourly and error-summary upserts. Each
    /// key in the batch's local grouping becomes one
    /// `INSERT ... ON CONFLICT ... DO UPDATE` statement so the
    /// read-modify-write for the weighted average happens inside the
    /// database, atomically.
    pub async fn apply(&self, batch: &[Event]) -> Result<(), AggregationError> {
        if batch.is_empty() {
            return Ok(());
        }

        let grouped = group_batch(batch);
        let mut tx = self.pool.begin().await?;

        for (key, group) in &grouped.daily {
            let (p50, p95, p99) = group.percentiles();
            sqlx::query(
                r#"
                INSERT INTO daily_aggregates
                    (date, tool, version, country, total_calls, success_calls, error_calls,
                     avg_response_time_ms, p50_response_time_ms, p95_response_time_ms, p99_response_time_ms,
                     min_response_time_ms, max_response_time_ms, cache_hit_count, cache_miss_count,
                     noaa_calls, openmeteo_calls, total_retries, avg_retry_count,
                     response_time_sample_count, retry_sample_count, updated_at)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, NOW())
                ON CONFLICT (date, tool, version, country) DO UPDATE SET
                    total_calls = daily_aggregates.total_calls + EXCLUDED.total_calls,
                    success_calls = daily_aggregates.success_calls + EXCLUDED.success_calls,
                    error_calls = daily_aggregates.error_calls + EXCLUDED.error_calls,
                    avg_response_time_ms = CASE
                        WHEN daily_aggregates.response_time_sample_count + EXCLUDED.response_time_sample_count = 0 THEN 0
                        ELSE (daily_aggregates.avg_response_time_ms * daily_aggregates.response_time_sample_count
                              + EXCLUDED.avg_response_time_ms * EXCLUDED.response_time_sample_count)
                             / (daily_aggregates.response_time_sample_count + EXCLUDED.response_time_sample_count)
                    END,
                    p50_response_time_ms = EXCLUDED.p50_response_time_ms,
                    p95_response_time_ms = EXCLUDED.p95_response_time_ms,
                    p99_response_time_ms = EXCLUDED.p99_response_time_ms,
                    min_response_time_ms = LEAST(COALESCE(daily_aggregates.min_response_time_ms, EXCLUDED.min_response_time_ms), COALESCE(EXCLUDED.min_response_time_ms, daily_aggregates.min_response_time_ms)),
                    max_response_time_ms = GREATEST(COALESCE(daily_aggregates.max_response_time_ms, EXCLUDED.max_response_time_ms), COALESCE(EXCLUDED.max_response_time_ms, daily_aggregates.max_response_time_ms)),
                    cache_hit_count = daily_aggregates.cache_hit_count + EXCLUDED.cache_hit_count,
                    cache_miss_count = daily_aggregates.cache_miss_count + EXCLUDED.cache_miss_count,
                    noaa_calls = daily_aggregates.noaa_calls + EXCLUDED.noaa_calls,
                    openmeteo_calls = daily_aggregates.openmeteo_calls + EXCLUDED.openmeteo_calls,
                    total_retries = daily_aggregates.total_retries + EXCLUDED.total_retries,
                    avg_retry_count = CASE
                        WHEN daily_aggregates.retry_sample_count + EXCLUDED.retry_sample_count = 0 THEN 0
                        ELSE (daily_aggregates.avg_retry_count * daily_aggregates.retry_sample_count
                              + EXCLUDED.avg_retry_count * EXCLUDED.retry_sample_count)
                             / (daily_aggregates.retry_sample_count + EXCLUDED.retry_sample_count)
                    END,
                    response_time_sample_count = daily_aggregates.response_time_sample_count + EXCLUDED.response_time_sample_count,
                    retry_sample_count = daily_aggregates.retry_sample_count + EXCLUDED.retry_sample_count,
                    updated_at = NOW()
                "#,
            )
            .bind(key.date)
            .bind(key.tool)
            .bind(&key.version)
            .bind(&key.country)
            .bind(group.total_calls)
            .bind(group.success_calls)
            .bind(group.error_calls)
            .bind(group.avg_response_time_ms())
            .bind(p50 as i32)
            .bind(p95 as i32)
            .bind(p99 as i32)
            .bind(group.min_response_time_ms().map(|v| v as i32))
            .bind(group.max_response_time_ms().map(|v| v as i32))
            .bind(group.cache_hit_count)
            .bind(group.cache_miss_count)
            .bind(group.noaa_calls)
            .bind(group.openmeteo_calls)
            .bind(group.retry_sum)
            .bind(group.avg_retry_count())
            .bind(group.response_times.len() as i64)
            .bind(group.retry_sample_count)
            .execute(&mut *tx)
            .await?;
        }

        for (key, group) in &grouped.hourly {
            sqlx::query(
                r#"
                INSERT INTO hourly_aggregates
                    (hour, tool, version, total_calls, success_calls, error_calls,
                     avg_response_time_ms, p95_response_time_ms, cache_hit_count, cache_miss_count,
                     response_time_sample_count, updated_at)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
                ON CONFLICT (hour, tool, version) DO UPDATE SET
                    total_calls = hourly_aggregates.total_calls + EXCLUDED.total_calls,
                    success_calls = hourly_aggregates.success_calls + EXCLUDED.success_calls,
                    error_calls = hourly_aggregates.error_calls + EXCLUDED.error_calls,
                    avg_response_time_ms = CASE
                        WHEN hourly_aggregates.response_time_sample_count + EXCLUDED.response_time_sample_count = 0 THEN 0
                        ELSE (hourly_aggregates.avg_response_time_ms * hourly_aggregates.response_time_sample_count
                              + EXCLUDED.avg_response_time_ms * EXCLUDED.response_time_sample_count)
                             / (hourly_aggregates.response_time_sample_count + EXCLUDED.response_time_sample_count)
                    END,
                    p95_response_time_ms = EXCLUDED.p95_response_time_ms,
                    cache_hit_count = hourly_aggregates.cache_hit_count + EXCLUDED.cache_hit_count,
                    cache_miss_count = hourly_aggregates.cache_miss_count + EXCLUDED.cache_miss_count,
                    response_time_sample_count = hourly_aggregates.response_time_sample_count + EXCLUDED.response_time_sample_count,
                    updated_at = NOW()
                "#,
            )
            .bind(key.hour)
            .bind(key.tool)
            .bind(&key.version)
            .bind(group.total_calls)
            .bind(group.success_calls)
            .bind(group.error_calls)
            .bind(group.avg_response_time_ms())
            .bind(group.p95_response_time_ms() as i32)
            .bind(group.cache_hit_count)
            .bind(group.cache_miss_count)
            .bind(group.response_times.len() as i64)
            .execute(&mut *tx)
            .await?;
        }

        for (key, group) in &grouped.errors {
            let affected: Vec<String> = group.affected_versions.iter().cloned().collect();
            sqlx::query(
                r#"
                INSERT INTO error_summaries
                    (hour, tool, error_type, count, first_seen, last_seen, affected_versions)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (hour, tool, error_type) DO UPDATE SET
                    count = error_summaries.count + EXCLUDED.count,
                    first_seen = LEAST(error_summaries.first_seen, EXCLUDED.first_seen),
                    last_seen = GREATEST(error_summaries.last_seen, EXCLUDED.last_seen),
                    affected_versions = (
                        SELECT ARRAY(
                            SELECT DISTINCT unnest(error_summaries.affected_versions || EXCLUDED.affected_versions)
                        )
                    )
                "#,
            )
            .bind(key.hour)
            .bind(key.tool)
            .bind(&key.error_type)
            .bind(group.count)
            .bind(group.first_seen)
            .bind(group.last_seen)
            .bind(&affected)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_common::event::{AnalyticsLevel, CoreFields, StandardFields, Status, ToolName};
    use chrono::TimeZone;

    fn standard_event(rt: i32) -> Event {
        Event::Standard {
            core: CoreFields {
                version: "1.0.0".to_string(),
                tool: ToolName::GetForecast,
                status: Status::Success,
                timestamp_hour: chrono::Utc.with_ymd_and_hms(2025, 11, 12, 20, 0, 0).unwrap(),
                analytics_level: AnalyticsLevel::Standard,
            },
            standard: StandardFields {
                response_time_ms: Some(rt),
                country: Some("US".to_string()),
                ..Default::default()
            },
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn raw_insert_persists_the_whole_batch(pool: PgPool) {
        let store = AggregatorStore::new(pool.clone());
        let batch = vec![standard_event(100), standard_event(200)];
        store.insert_raw_batch(&batch).await.expect("insert should succeed");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn weighted_average_is_not_an_average_of_averages(pool: PgPool) {
        let store = AggregatorStore::new(pool.clone());

        // 10 events at 100ms, then 10 at 200ms, then 1 at 300ms, all same key.
        let batch_a: Vec<Event> = (0..10).map(|_| standard_event(100)).collect();
        let batch_b: Vec<Event> = (0..10).map(|_| standard_event(200)).collect();
        let batch_c: Vec<Event> = vec![standard_event(300)];

        store.apply(&batch_a).await.unwrap();
        store.apply(&batch_b).await.unwrap();

        let avg: f64 = sqlx::query_scalar(
            "SELECT avg_response_time_ms FROM daily_aggregates WHERE tool = 'get_forecast'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!((avg - 150.0).abs() < 1e-9, "expected 150, got {avg}");

        store.apply(&batch_c).await.unwrap();
        let avg: f64 = sqlx::query_scalar(
            "SELECT avg_response_time_ms FROM daily_aggregates WHERE tool = 'get_forecast'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let expected = (10.0 * 150.0 + 1.0 * 300.0) / 11.0;
        assert!((avg - expected).abs() < 1e-9, "expected {expected}, got {avg}");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn total_calls_equals_success_plus_error(pool: PgPool) {
        let store = AggregatorStore::new(pool.clone());
        let mut error_event = standard_event(50);
        if let Event::Standard { core, standard } = &mut error_event {
            core.status = Status::Error;
            standard.error_type = Some("timeout".to_string());
        }
        store.apply(&[standard_event(50), error_event]).await.unwrap();

        let row: (i64, i64, i64) = sqlx::query_as(
            "SELECT total_calls, success_calls, error_calls FROM daily_aggregates WHERE tool = 'get_forecast'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row.0, row.1 + row.2);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn error_summary_tracks_affected_versions(pool: PgPool) {
        let store = AggregatorStore::new(pool.clone());
        let mut event = standard_event(10);
        if let Event::Standard { core, standard } = &mut event {
            core.status = Status::Error;
            standard.error_type = Some("timeout".to_string());
        }
        store.apply(&[event]).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT count FROM error_summaries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
