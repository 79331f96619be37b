//! Attaches a random per-request identifier to every log line emitted
//! while handling a request, grounded on `capture`'s use of
//! `tower_http::trace::TraceLayer` for per-request spans,
//! extended here with an explicit UUIDv7 id so it survives into every log
//! line emitted while handling the request — not just the access log.

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use tracing::Instrument;
use uuid::Uuid;

pub async fn attach_request_id(req: Request<Body>, next: Next) -> impl IntoResponse {
    let request_id = Uuid::now_v7();
    let span = tracing::info_span!("request", request_id = %request_id);
    next.run(req).instrument(span).await
}
