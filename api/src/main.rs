use anyhow::Context;
use axum::{routing::get, Router};
use dpr_api::auth::TokenService;
use dpr_api::config::Config;
use dpr_api::directory::Directory;
use dpr_api::ingest::Ingest;
use dpr_api::memory::MemoryStore;
use dpr_api::rest::{self, AppState};
use dpr_api::store::{DeviceStore, TelemetryStore};
use dpr_api::{db, metrics};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    info!("Starting driving telemetry API");
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.database_host());

    // Initialize metrics
    metrics::init_metrics();

    let devices: Arc<dyn DeviceStore>;
    let telemetry: Arc<dyn TelemetryStore>;
    if config.uses_memory_store() {
        warn!("Using in-memory storage, data is lost on exit");
        let store = Arc::new(MemoryStore::new());
        devices = store.clone();
        telemetry = store;
    } else {
        let pool = db::make_pool(&config.database_url)
            .await
            .context("Failed to connect to database")?;
        let store = Arc::new(db::PgStore::new(pool));
        devices = store.clone();
        telemetry = store;
    }

    let state = AppState {
        directory: Directory::new(devices, TokenService::new(&config.jwt_secret)),
        ingest: Ingest::new(telemetry, config.dashboard_record_limit),
    };

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
