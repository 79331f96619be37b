//! `POST /v1/events`: decode, validate, rate-limit and enqueue a
//! batch. Grounded on `capture::capture::event`'s shape (state, client IP,
//! headers, body) though the IP here never leaves this handler as
//! anything but a rate-limit bucket key.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_client_ip::InsecureClientIp;
use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use serde_json::{json, Value};

use crate::error::IngestError;
use crate::handlers::client_key;
use crate::rate_limit::RateLimitDecision;
use crate::state::AppState;

pub async fn ingest_events(
    State(state): State<AppState>,
    InsecureClientIp(ip): InsecureClientIp,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), IngestError> {
    let key = client_key(ip);

    if state.in_process_limiter.is_limited(&key) {
        counter!("analytics_ingest_rate_limited_total", "layer" => "in_process").increment(1);
        return Err(IngestError::RateLimited {
            retry_after_secs: 1,
        });
    }

    match state
        .cross_instance_limiter
        .check(&key)
        .await
        .map_err(|err| IngestError::internal_in(err.to_string(), state.config.is_development()))?
    {
        RateLimitDecision::Allowed => {}
        RateLimitDecision::Limited { retry_after_secs } => {
            counter!("analytics_ingest_rate_limited_total", "layer" => "cross_instance").increment(1);
            return Err(IngestError::RateLimited { retry_after_secs });
        }
        RateLimitDecision::Banned { retry_after_secs } => {
            counter!("analytics_ingest_rate_limited_total", "layer" => "banned").increment(1);
            return Err(IngestError::RateLimited { retry_after_secs });
        }
    }

    let events = analytics_validator::validate_batch(&body, state.config.max_batch_size)
        .map_err(IngestError::Validation)?;
    let count = events.len();

    state.queue.enqueue_many(&events).await?;

    counter!("analytics_ingest_events_accepted_total").increment(count as u64);

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "accepted",
            "count": count,
            "timestamp": Utc::now(),
        })),
    ))
}
