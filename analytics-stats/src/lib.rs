//! Read-only stats layer: one function per `/v1/stats/*` endpoint,
//! each backed by a read-through cache keyed by `(endpoint, period)`.
//!
//! Grounded conceptually on a `common/cache` read-through pattern; no
//! such crate was available to depend on directly, so it is implemented
//! here against `moka` instead (documented in DESIGN.md). A cache-backend
//! failure is
//! not part of this type's contract — `moka` is in-process and
//! infallible, so every call here always falls through to Postgres on a
//! miss and never raises a "cache failed" error to the caller.

pub mod period;
pub mod queries;

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use queries::{ErrorSummaryDto, Overview, PerformanceStats, StatsError, ToolStats, ToolSummary};
use serde_json::Value;
use sqlx::postgres::PgPool;

use period::Period;

#[derive(Clone)]
pub struct StatsLayer {
    pool: PgPool,
    cache: Arc<Cache<String, Value>>,
}

impl StatsLayer {
    pub fn new(pool: PgPool, ttl_seconds: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(ttl_seconds))
            .build();
        Self {
            pool,
            cache: Arc::new(cache),
        }
    }

    async fn cached<T, F>(&self, endpoint: &str, period: Period, compute: F) -> Result<T, StatsError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: std::future::Future<Output = Result<T, StatsError>>,
    {
        let key = format!("{endpoint}:{}", period.as_token());
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(value) = serde_json::from_value(cached) {
                return Ok(value);
            }
        }

        let value = compute.await?;
        if let Ok(json) = serde_json::to_value(&value) {
            self.cache.insert(key, json);
        }
        Ok(value)
    }

    pub async fn overview(&self, period: Period) -> Result<Overview, StatsError> {
        self.cached("overview", period, queries::overview(&self.pool, period))
            .await
    }

    pub async fn tools_stats(&self, period: Period) -> Result<Vec<ToolSummary>, StatsError> {
        self.cached("tools", period, queries::tools_stats(&self.pool, period))
            .await
    }

    /// Not cached under the same `(endpoint, period)` scheme since it is
    /// keyed additionally by tool name; cached per-tool instead.
    pub async fn tool_stats(&self, tool: &str, period: Period) -> Result<Option<ToolStats>, StatsError> {
        let key = format!("tool:{tool}:{}", period.as_token());
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(value) = serde_json::from_value::<Option<ToolStats>>(cached) {
                return Ok(value);
            }
        }
        let value = queries::tool_stats(&self.pool, tool, period).await?;
        if let Ok(json) = serde_json::to_value(&value) {
            self.cache.insert(key, json);
        }
        Ok(value)
    }

    pub async fn error_stats(&self, period: Period) -> Result<Vec<ErrorSummaryDto>, StatsError> {
        self.cached("errors", period, queries::error_stats(&self.pool, period))
            .await
    }

    pub async fn performance_stats(&self, period: Period) -> Result<PerformanceStats, StatsError> {
        self.cached(
            "performance",
            period,
            queries::performance_stats(&self.pool, period),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_round_trips_through_token() {
        for token in ["1h", "6h", "12h", "24h", "7d", "30d", "90d"] {
            let period: Period = token.parse().unwrap();
            assert_eq!(period.as_token(), token);
        }
    }
}
