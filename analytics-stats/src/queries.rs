//! The five read-only queries behind the stats endpoints, each a
//! single aggregate read over the relevant table for `[now - period,
//! now]`. Averaged response times always come from `raw_events`
//! directly — averaging the already-averaged `daily_aggregates` rows
//! would compound the same "averaging averages" bug the aggregator
//! itself must avoid.

use analytics_common::event::ToolName;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::postgres::PgPool;
use thiserror::Error;

use crate::period::Period;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSummary {
    pub tool: String,
    pub total_calls: i64,
    pub success_calls: i64,
    pub error_calls: i64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorSummaryDto {
    pub tool: String,
    pub error_type: String,
    pub count: i64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Distribution {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub total_calls: i64,
    pub success_calls: i64,
    pub error_calls: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Overview {
    pub total_calls: i64,
    pub success_calls: i64,
    pub error_calls: i64,
    pub top_tools: Vec<ToolSummary>,
    pub top_errors: Vec<ErrorSummaryDto>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolStats {
    pub tool: String,
    pub daily_series: Vec<DailyPoint>,
    pub version_distribution: Vec<Distribution>,
    pub country_distribution: Vec<Distribution>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceStats {
    pub avg_response_time_ms: f64,
    pub p50_response_time_ms: i64,
    pub p95_response_time_ms: i64,
    pub p99_response_time_ms: i64,
    pub cache_hit_count: i64,
    pub cache_miss_count: i64,
    pub service_distribution: Vec<Distribution>,
}

fn since_date(period: Period) -> NaiveDate {
    (Utc::now() - period.duration()).date_naive()
}

fn since_instant(period: Period) -> DateTime<Utc> {
    Utc::now() - period.duration()
}

pub async fn tool_summaries(pool: &PgPool, period: Period, limit: i64) -> Result<Vec<ToolSummary>, StatsError> {
    let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT tool::text, SUM(total_calls), SUM(success_calls), SUM(error_calls)
        FROM daily_aggregates
        WHERE date >= $1
        GROUP BY tool
        ORDER BY SUM(total_calls) DESC
        LIMIT $2
        "#,
    )
    .bind(since_date(period))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(tool, total, success, error)| ToolSummary {
            tool,
            total_calls: total,
            success_calls: success,
            error_calls: error,
            success_rate: if total > 0 { success as f64 / total as f64 } else { 0.0 },
        })
        .collect())
}

pub async fn error_summaries(pool: &PgPool, period: Period, limit: i64) -> Result<Vec<ErrorSummaryDto>, StatsError> {
    let rows: Vec<(String, String, i64, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT tool::text, error_type, SUM(count), MAX(last_seen)
        FROM error_summaries
        WHERE hour >= $1
        GROUP BY tool, error_type
        ORDER BY SUM(count) DESC
        LIMIT $2
        "#,
    )
    .bind(since_instant(period))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(tool, error_type, count, last_seen)| ErrorSummaryDto {
            tool,
            error_type,
            count,
            last_seen,
        })
        .collect())
}

pub async fn overview(pool: &PgPool, period: Period) -> Result<Overview, StatsError> {
    let totals: (Option<i64>, Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT SUM(total_calls), SUM(success_calls), SUM(error_calls) FROM daily_aggregates WHERE date >= $1",
    )
    .bind(since_date(period))
    .fetch_one(pool)
    .await?;

    Ok(Overview {
        total_calls: totals.0.unwrap_or(0),
        success_calls: totals.1.unwrap_or(0),
        error_calls: totals.2.unwrap_or(0),
        top_tools: tool_summaries(pool, period, 5).await?,
        top_errors: error_summaries(pool, period, 5).await?,
    })
}

pub async fn tools_stats(pool: &PgPool, period: Period) -> Result<Vec<ToolSummary>, StatsError> {
    tool_summaries(pool, period, i64::MAX).await
}

/// Returns `None` if `tool` is not a recognized tool name, or if the
/// recognized tool has no data in the window — either way the caller
/// should respond 404, not fail the request.
pub async fn tool_stats(pool: &PgPool, tool: &str, period: Period) -> Result<Option<ToolStats>, StatsError> {
    let Ok(tool_name) = tool.parse::<ToolName>() else {
        return Ok(None);
    };

    let daily_rows: Vec<(NaiveDate, i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT date, SUM(total_calls), SUM(success_calls), SUM(error_calls)
        FROM daily_aggregates
        WHERE tool = $1 AND date >= $2
        GROUP BY date
        ORDER BY date ASC
        "#,
    )
    .bind(tool_name)
    .bind(since_date(period))
    .fetch_all(pool)
    .await?;

    if daily_rows.is_empty() {
        return Ok(None);
    }

    let version_rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT version, SUM(total_calls)
        FROM daily_aggregates
        WHERE tool = $1 AND date >= $2
        GROUP BY version
        ORDER BY SUM(total_calls) DESC
        "#,
    )
    .bind(tool_name)
    .bind(since_date(period))
    .fetch_all(pool)
    .await?;

    let country_rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT country, SUM(total_calls)
        FROM daily_aggregates
        WHERE tool = $1 AND date >= $2
        GROUP BY country
        ORDER BY SUM(total_calls) DESC
        "#,
    )
    .bind(tool_name)
    .bind(since_date(period))
    .fetch_all(pool)
    .await?;

    Ok(Some(ToolStats {
        tool: tool.to_string(),
        daily_series: daily_rows
            .into_iter()
            .map(|(date, total, success, error)| DailyPoint {
                date,
                total_calls: total,
                success_calls: success,
                error_calls: error,
            })
            .collect(),
        version_distribution: version_rows
            .into_iter()
            .map(|(key, count)| Distribution { key, count })
            .collect(),
        country_distribution: country_rows
            .into_iter()
            .map(|(key, count)| Distribution { key, count })
            .collect(),
    }))
}

pub async fn error_stats(pool: &PgPool, period: Period) -> Result<Vec<ErrorSummaryDto>, StatsError> {
    error_summaries(pool, period, i64::MAX).await
}

pub async fn performance_stats(pool: &PgPool, period: Period) -> Result<PerformanceStats, StatsError> {
    let row: (Option<f64>,) = sqlx::query_as(
        "SELECT AVG(response_time_ms)::float8 FROM raw_events WHERE timestamp_hour >= $1 AND response_time_ms IS NOT NULL",
    )
    .bind(since_instant(period))
    .fetch_one(pool)
    .await?;

    let percentile_row: (Option<i32>, Option<i32>, Option<i32>) = sqlx::query_as(
        r#"
        SELECT
            percentile_disc(0.50) WITHIN GROUP (ORDER BY response_time_ms),
            percentile_disc(0.95) WITHIN GROUP (ORDER BY response_time_ms),
            percentile_disc(0.99) WITHIN GROUP (ORDER BY response_time_ms)
        FROM raw_events
        WHERE timestamp_hour >= $1 AND response_time_ms IS NOT NULL
        "#,
    )
    .bind(since_instant(period))
    .fetch_one(pool)
    .await?;

    let cache_row: (Option<i64>, Option<i64>) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE cache_hit IS TRUE),
            COUNT(*) FILTER (WHERE cache_hit IS FALSE)
        FROM raw_events
        WHERE timestamp_hour >= $1
        "#,
    )
    .bind(since_instant(period))
    .fetch_one(pool)
    .await?;

    let service_rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT service::text, COUNT(*)
        FROM raw_events
        WHERE timestamp_hour >= $1 AND service IS NOT NULL
        GROUP BY service
        ORDER BY COUNT(*) DESC
        "#,
    )
    .bind(since_instant(period))
    .fetch_all(pool)
    .await?;

    Ok(PerformanceStats {
        avg_response_time_ms: row.0.unwrap_or(0.0),
        p50_response_time_ms: percentile_row.0.unwrap_or(0) as i64,
        p95_response_time_ms: percentile_row.1.unwrap_or(0) as i64,
        p99_response_time_ms: percentile_row.2.unwrap_or(0) as i64,
        cache_hit_count: cache_row.0.unwrap_or(0),
        cache_miss_count: cache_row.1.unwrap_or(0),
        service_distribution: service_rows
            .into_iter()
            .map(|(key, count)| Distribution { key, count })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_daily(pool: &PgPool) {
        sqlx::query(
            r#"
            INSERT INTO daily_aggregates
                (date, tool, version, country, total_calls, success_calls, error_calls, avg_response_time_ms)
            VALUES
                (CURRENT_DATE, 'get_forecast', '1.0.0', 'US', 10, 8, 2, 120.0)
            "#,
        )
        .execute(pool)
        .await
        .unwrap();
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn overview_sums_totals_within_window(pool: PgPool) {
        seed_daily(&pool).await;
        let overview = overview(&pool, Period::ThirtyDays).await.unwrap();
        assert_eq!(overview.total_calls, 10);
        assert_eq!(overview.success_calls, 8);
        assert_eq!(overview.error_calls, 2);
        assert_eq!(overview.top_tools.len(), 1);
        assert_eq!(overview.top_tools[0].success_rate, 0.8);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn tool_stats_returns_none_when_no_data(pool: PgPool) {
        let result = tool_stats(&pool, "get_alerts", Period::ThirtyDays).await.unwrap();
        assert!(result.is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn tool_stats_returns_none_rather_than_erroring_on_an_unknown_tool_name(pool: PgPool) {
        seed_daily(&pool).await;
        let result = tool_stats(&pool, "not_a_real_tool", Period::ThirtyDays)
            .await
            .expect("an unrecognized tool name is a 404, not a query error");
        assert!(result.is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn tool_stats_returns_series_when_data_present(pool: PgPool) {
        seed_daily(&pool).await;
        let result = tool_stats(&pool, "get_forecast", Period::ThirtyDays)
            .await
            .unwrap()
            .expect("tool has data");
        assert_eq!(result.daily_series.len(), 1);
        assert_eq!(result.version_distribution[0].key, "1.0.0");
        assert_eq!(result.country_distribution[0].key, "US");
    }
}
