//! Maps ingestion failures to an HTTP status and JSON body, grounded on
//! `capture::api::CaptureError`'s `IntoResponse` impl.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

#[derive(Debug)]
pub enum IngestError {
    Validation(Vec<String>),
    QueueFull,
    RateLimited { retry_after_secs: u64 },
    Unavailable { retry_after_secs: u64 },
    /// `expose` gates whether `message` is returned to the caller: per §7,
    /// internal errors are generic 500s to the client "unless development
    /// mode".
    Internal { message: String, expose: bool },
}

impl IngestError {
    /// Never exposes `message` to the caller; used wherever no
    /// request-scoped `Config` is available to decide otherwise.
    pub fn internal(message: impl Into<String>) -> Self {
        IngestError::Internal {
            message: message.into(),
            expose: false,
        }
    }

    /// Exposes `message` to the caller only when `development` is true.
    pub fn internal_in(message: impl Into<String>, development: bool) -> Self {
        IngestError::Internal {
            message: message.into(),
            expose: development,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            IngestError::Validation(details) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "validation_failed",
                    details: Some(details),
                    retry_after: None,
                    message: None,
                },
            ),
            IngestError::QueueFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    error: "service_unavailable",
                    details: None,
                    retry_after: Some(60),
                    message: None,
                },
            ),
            IngestError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    error: "rate_limit_exceeded",
                    details: None,
                    retry_after: Some(retry_after_secs),
                    message: None,
                },
            ),
            IngestError::Unavailable { retry_after_secs } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    error: "service_unavailable",
                    details: None,
                    retry_after: Some(retry_after_secs),
                    message: None,
                },
            ),
            IngestError::Internal { message, expose } => {
                tracing::error!(error = %message, "internal error handling ingest request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal_error",
                        details: None,
                        retry_after: None,
                        message: if expose { Some(message) } else { None },
                    },
                )
            }
        };

        (status, Json(serde_json::to_value(body).unwrap_or(json!({"error": "internal_error"})))).into_response()
    }
}

impl From<analytics_queue::QueueError> for IngestError {
    /// A full queue maps to the ordinary capacity response; anything else
    /// (pool timeout, connection loss, a malformed row) means the backing
    /// store itself is unreachable, which §4.2/§6.1 both require to surface
    /// as 503 + `Retry-After`, not a generic 500.
    fn from(err: analytics_queue::QueueError) -> Self {
        match err {
            analytics_queue::QueueError::Full => IngestError::QueueFull,
            other => {
                tracing::error!(error = %other, "queue backing store unavailable");
                IngestError::Unavailable {
                    retry_after_secs: 60,
                }
            }
        }
    }
}

impl From<analytics_stats::queries::StatsError> for IngestError {
    fn from(err: analytics_stats::queries::StatsError) -> Self {
        IngestError::internal(err.to_string())
    }
}
