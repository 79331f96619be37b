//! Assembles the HTTP surface, grounded on `capture::router::router`
//! for layering and `hook_common::metrics::track_metrics` for the request
//! metrics middleware.

use std::future::ready;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{ingest, stats, system};
use crate::metrics::track_metrics;
use crate::request_id::attach_request_id;
use crate::state::AppState;

pub fn router(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let cors_origins = state.config.cors_origin.0.clone();
    let cors = if cors_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
    .allow_headers([
        axum::http::header::CONTENT_TYPE,
        axum::http::header::AUTHORIZATION,
    ]);

    let body_limit = state.config.body_limit_bytes;
    let timeout = Duration::from_millis(state.config.request_timeout_ms);

    Router::new()
        .route("/v1/events", post(ingest::ingest_events))
        .route("/v1/stats/overview", get(stats::overview))
        .route("/v1/stats/tools", get(stats::tools))
        .route("/v1/stats/tool/:name", get(stats::tool))
        .route("/v1/stats/errors", get(stats::errors))
        .route("/v1/stats/performance", get(stats::performance))
        .route("/v1/health", get(system::health))
        .route("/v1/status", get(system::status))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(attach_request_id))
        .layer(axum::middleware::from_fn(track_metrics))
        .layer(tower_http::timeout::TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
        .route("/metrics", get(move || ready(metrics_handle.render())))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use sqlx::PgPool;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use health::HealthRegistry;

    fn test_app(pool: PgPool) -> Router {
        let health = HealthRegistry::new("liveness");
        let state = AppState::new(pool, health, Config::for_tests());
        router(state, crate::metrics::setup_metrics_recorder())
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn health_reports_database_connectivity(pool: PgPool) {
        let app = test_app(pool);

        let response = app
            .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["databaseConnected"], true);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn ingest_then_stats_overview_round_trips(pool: PgPool) {
        let app = test_app(pool);

        let payload = serde_json::json!({
            "events": [{
                "version": "1.0.0",
                "tool": "get_forecast",
                "status": "success",
                "timestamp_hour": "2025-11-12T20:00:00Z",
                "analytics_level": "minimal"
            }]
        });

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/events")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/stats/overview")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn ingest_rejects_batch_containing_pii(pool: PgPool) {
        let app = test_app(pool);

        let payload = serde_json::json!({
            "events": [{
                "version": "1.0.0",
                "tool": "get_forecast",
                "status": "success",
                "timestamp_hour": "2025-11-12T20:00:00Z",
                "analytics_level": "minimal",
                "user_id": "abc123"
            }]
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/events")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
