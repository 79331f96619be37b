//! HTTP entry point for analytics ingestion, grounded on
//! `hook_worker::main`'s bootstrap shape: load config, build the pool,
//! register health, serve the router, wait for a shutdown signal.

mod config;
mod error;
mod handlers;
mod metrics;
mod rate_limit;
mod request_id;
mod router;
mod state;

use std::time::Duration;

use envconfig::Envconfig;
use health::HealthRegistry;

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let pool = config
        .database
        .create_pool()
        .await
        .expect("failed to connect to database");

    let health = HealthRegistry::new("liveness");
    let api_health = health
        .register("api".to_string(), Duration::from_secs(30))
        .await;
    api_health.report_healthy().await;
    tokio::spawn(report_liveness_periodically(api_health, Duration::from_secs(10)));

    let metrics_handle = metrics::setup_metrics_recorder();

    let bind = config.bind();
    let state = AppState::new(pool, health, config);
    let app = router::router(state, metrics_handle);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {bind}: {err}"));

    tracing::info!(%bind, "analytics-ingest listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Keeps the "api" component's registry entry from going `Stalled`: unlike
/// `analytics-worker`'s loop, which reports liveness on every poll tick,
/// this process has no natural recurring tick, so it gets one of its own.
/// Mirrors `hook_worker::worker`'s `interval.tick().await; liveness.report_healthy().await;`.
async fn report_liveness_periodically(handle: health::HealthHandle, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        handle.report_healthy().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
