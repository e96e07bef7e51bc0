pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod pricing;
pub mod recovery;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CliArgs, ServerConfig};
pub use error::{ERROR_METRICS, ErrorKind, ErrorMetrics, LedgerError, LedgerResult, StoreError};
pub use ledger::{LedgerService, LedgerSettings};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};
pub use state::AppState;

use anyhow::Result;
use axum::Router;
use shutdown::{
    CompositeShutdownHandler, SchedulerShutdownHandler, ShutdownHandler, StoreShutdownHandler,
};
use std::{future::IntoFuture, sync::Arc};
use tokio::net::TcpListener;

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone())?);

    tracing::info!(
        bind = %config.http_bind_address,
        production_interval_ms = config.production_interval_ms,
        lifecycle_interval_ms = config.lifecycle_interval_ms,
        seconds_per_sim_year = config.seconds_per_sim_year,
        "starting farm ledger",
    );

    let shutdown_config =
        ShutdownConfig::default().with_total_timeout(config.graceful_shutdown_timeout_secs);
    let coordinator = Arc::new(ShutdownCoordinator::new(shutdown_config));

    let listener = TcpListener::bind(config.http_bind_address).await?;
    serve(state, listener, coordinator).await
}

/// Health, readiness and metrics endpoints.
pub fn ops_router(state: Arc<AppState>) -> Router {
    let health_checker = Arc::new(health::HealthChecker::new(state));

    Router::new()
        .route("/health", axum::routing::get(health::liveness_handler))
        .route("/ready", axum::routing::get(health::readiness_handler))
        .route(
            "/health/components",
            axum::routing::get(health::components_handler),
        )
        .route("/metrics", axum::routing::get(metrics_handler))
        .with_state(health_checker)
}

async fn metrics_handler() -> (axum::http::StatusCode, String) {
    let metrics_text = metrics::METRICS.encode();
    (axum::http::StatusCode::OK, metrics_text)
}

/// Runs the schedulers and the ops server on `listener` until a signal
/// arrives or the coordinator's token is cancelled, then shuts down in
/// phases.
pub async fn serve(
    state: Arc<AppState>,
    listener: TcpListener,
    coordinator: Arc<ShutdownCoordinator>,
) -> Result<()> {
    let token = coordinator.token();
    let tasks = state.spawn_schedulers(&token);

    let mut composite_handler = CompositeShutdownHandler::new();
    composite_handler.add_handler(Box::new(SchedulerShutdownHandler::new(
        token,
        tasks,
        state.heartbeats().into_iter().cloned().collect(),
        state.config().graceful_shutdown_timeout(),
    )));
    composite_handler.add_handler(Box::new(StoreShutdownHandler::new(state.store().clone())));

    let actual_addr = listener.local_addr()?;
    tracing::info!(bind = %actual_addr, "ops endpoints listening");

    let shutdown_coordinator = coordinator.clone();
    let server_result = axum::serve(listener, ops_router(state))
        .with_graceful_shutdown(async move {
            shutdown_coordinator.wait_for_signal().await;
        })
        .into_future()
        .await;

    tracing::info!("server stopped, running shutdown handlers");
    if let Err(e) = coordinator.shutdown(&composite_handler).await {
        tracing::error!("error during shutdown: {}", e);
        // drain whatever the timed-out sequence left behind
        composite_handler.shutdown().await?;
    }

    server_result.map_err(anyhow::Error::from)
}
