//! The batch-draining worker process, deployed as its own OS
//! process independent of `analytics-ingest`, grounded on
//! `hook_worker::main`'s bootstrap shape: load config, build the pool,
//! register health, serve `/metrics` on a side port, run the worker loop,
//! wait for a shutdown signal.

mod config;
mod error;
mod worker;

use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use health::HealthRegistry;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;

use analytics_aggregator::AggregatorStore;
use analytics_queue::EventQueue;
use config::Config;
use worker::AnalyticsWorker;

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
    let liveness = health
        .register("worker".to_string(), time::Duration::seconds(30))
        .await;

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("metrics recorder installs exactly once per process");

    let readiness_health = health.clone();
    let metrics_router = Router::new()
        .route("/_readiness", get(move || ready(readiness_health.get_status())))
        .route("/_liveness", get(move || ready(health.get_status())))
        .route("/metrics", get(move || ready(metrics_handle.render())));
    let bind = config.bind();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {bind}: {err}"));
    tokio::spawn(async move {
        axum::serve(listener, metrics_router)
            .await
            .expect("metrics server failed");
    });

    let queue = Arc::new(EventQueue::new(pool.clone(), config.max_queue_size));
    let store = Arc::new(AggregatorStore::new(pool));
    let worker = AnalyticsWorker::new(
        queue,
        store,
        config.batch_size,
        config.poll_interval.0,
        liveness,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_task = tokio::spawn(async move {
        if let Err(err) = worker.run(shutdown_rx).await {
            tracing::error!(error = %err, "worker loop exited with an error");
        }
    });

    tracing::info!("analytics-worker running");
    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight batch");

    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(config.shutdown_grace_period.0, worker_task)
        .await
        .is_err()
    {
        tracing::warn!("worker did not stop within the shutdown grace period");
    }

    Ok(())
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
}
