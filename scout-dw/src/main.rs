//! scout-dw - Discovery Watcher service
//!
//! Watches the configured root for project directories, publishes stable
//! discovery events on the bus, and serves a health endpoint.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use scout_common::bus::BusClient;
use scout_common::config::ScoutConfig;
use scout_dw::{scan, DebouncedWatcher, WatcherOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Clone)]
struct AppState {
    bus: Arc<BusClient>,
    watcher: Arc<DebouncedWatcher>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting scout-dw (Discovery Watcher)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ScoutConfig::load().context("failed to load configuration")?;
    let watch_path = config
        .require_watch_path()
        .context("watch path configuration")?;
    info!("Watch root: {}", watch_path.display());

    // Admin flag: purge rows left inactive by earlier removals before the
    // reconciliation scan re-discovers what still exists.
    if config.watcher.reset_deleted {
        let pool = scout_common::db::init_database_pool(&config.database_path())
            .await
            .context("database connection")?;
        let removed = scout_common::db::projects::delete_inactive(&pool).await?;
        info!("reset_deleted: removed {} inactive projects", removed);
        pool.close().await;
    }

    let bus = BusClient::connect(&config.redis_url())
        .await
        .context("bus connection")?;

    if config.watcher.startup_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.watcher.startup_delay_ms)).await;
    }

    let options = WatcherOptions {
        root: watch_path.clone(),
        depth: config.watcher.depth,
        debounce: Duration::from_millis(config.watcher.debounce_ms),
        stability_threshold: Duration::from_millis(config.watcher.stability_threshold_ms),
        ignore_patterns: config.watcher.ignore_patterns.clone(),
        max_permission_errors: config.watcher.max_permission_errors,
    };
    let watcher = Arc::new(DebouncedWatcher::start(options, bus.clone())?);

    // Discover what already exists before relying on change events
    scan::reconcile(&watch_path, config.watcher.depth, &bus).await?;

    let state = AppState {
        bus: bus.clone(),
        watcher: watcher.clone(),
    };
    let app = Router::new()
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:5812")
        .await
        .context("bind health port")?;
    info!("Listening on http://127.0.0.1:5812");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Health server stopped: {}", e);
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received; flushing pending discovery events");

    // Flush debounced events before the bus goes away
    watcher.shutdown().await.ok();
    server.abort();

    info!("scout-dw stopped");
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let watcher = state.watcher.health_snapshot();
    Json(serde_json::json!({
        "service": "scout-dw",
        "healthy": watcher.healthy && state.bus.is_ready(),
        "bus_ready": state.bus.is_ready(),
        "watcher": {
            "healthy": watcher.healthy,
            "pending": watcher.pending,
            "permission_errors": watcher.permission_errors,
            "events_emitted": watcher.events_emitted,
        },
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
