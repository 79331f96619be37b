//! `GET /v1/health` and `GET /v1/status`. Both probe the pool and
//! queue depth directly rather than through the health registry, since the
//! registry tracks the worker/background components of this process, not
//! this per-request liveness check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

async fn probe(state: &AppState) -> (bool, i64) {
    let connected = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let depth = state.queue.depth().await.unwrap_or(-1);
    (connected, depth)
}

/// §4.6: "Returns 503 when the raw store is unreachable." This probe is
/// gated on the direct `SELECT 1` only, not on the health registry — the
/// registry tracks background-component liveness (used by `/v1/status`),
/// which is a different concern from "is the store reachable right now".
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let (connected, depth) = probe(&state).await;
    let status = if connected { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(json!({
            "status": if connected { "healthy" } else { "unhealthy" },
            "databaseConnected": connected,
            "queueDepth": depth,
            "uptimeSeconds": state.started_at.elapsed().as_secs(),
            "memoryUsedBytes": memory_used_bytes(),
        })),
    )
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (connected, depth) = probe(&state).await;
    let registry_status = state.health.get_status();

    Json(json!({
        "status": if registry_status.healthy { "healthy" } else { "unhealthy" },
        "databaseConnected": connected,
        "queueDepth": depth,
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "memoryUsedBytes": memory_used_bytes(),
        "components": format!("{:?}", registry_status.components),
    }))
}

/// Best-effort resident set size; `/proc` is only available on Linux, which
/// is the only platform this service is deployed on.
fn memory_used_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|contents| contents.split_whitespace().nth(1).map(str::to_string))
        .and_then(|pages| pages.parse::<u64>().ok())
        .map(|pages| pages * 4096)
        .unwrap_or(0)
}
