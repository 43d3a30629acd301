//! scout-rt - Realtime gateway service

use anyhow::{Context, Result};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use scout_common::bus::BusClient;
use scout_common::config::ScoutConfig;
use scout_common::events::ScoutEvent;
use scout_rt::fanout::{self, ConnectionRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Local rebroadcast capacity between the bus pump and client tasks
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
struct AppState {
    events: broadcast::Sender<ScoutEvent>,
    registry: Arc<ConnectionRegistry>,
    bus: Arc<BusClient>,
    keepalive: Duration,
    shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting scout-rt (Realtime Gateway)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ScoutConfig::load().context("failed to load configuration")?;

    let bus = BusClient::connect(&config.redis_url())
        .await
        .context("bus connection")?;

    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let shutdown = CancellationToken::new();

    // One bus subscription per process; clients share the local channel
    let pump = tokio::spawn(fanout::run_event_pump(
        bus.subscribe_lifecycle(),
        events_tx.clone(),
        shutdown.clone(),
    ));

    let state = AppState {
        events: events_tx,
        registry: Arc::new(ConnectionRegistry::default()),
        bus: bus.clone(),
        keepalive: Duration::from_millis(config.realtime.keepalive_ms),
        shutdown: shutdown.clone(),
    };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state.clone());

    let addr = format!("127.0.0.1:{}", config.realtime.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("Listening on ws://{addr}/ws");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Realtime server stopped: {}", e);
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received; closing client connections");

    // Connections close first, the bus subscription is torn down last
    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.abort();
    pump.abort();

    info!("scout-rt stopped");
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| {
        fanout::serve_connection(
            socket,
            state.events.subscribe(),
            state.registry.clone(),
            state.keepalive,
            state.shutdown.clone(),
        )
    })
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "scout-rt",
        "healthy": state.bus.is_ready(),
        "bus_ready": state.bus.is_ready(),
        "clients": state.registry.count(),
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
