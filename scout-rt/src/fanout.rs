//! WebSocket fan-out
//!
//! Multiplexes lifecycle events from the bus to connected clients. Each
//! connection task owns its socket and its subscription filter; events
//! arrive via a shared in-process broadcast channel fed by a single bus
//! pump. There is no per-client queue: a failed send drops the client.

use crate::protocol::{ClientFrame, ServerFrame, SubscriptionFilter};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use scout_common::events::ScoutEvent;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tracks connected clients for health reporting and shutdown accounting
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: Mutex<HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn add(&self, client_id: Uuid) {
        self.clients
            .lock()
            .expect("registry lock poisoned")
            .insert(client_id);
    }

    pub fn remove(&self, client_id: Uuid) {
        self.clients
            .lock()
            .expect("registry lock poisoned")
            .remove(&client_id);
    }

    pub fn count(&self) -> usize {
        self.clients.lock().expect("registry lock poisoned").len()
    }
}

/// Forward bus events into the local broadcast channel all connections
/// subscribe to. One pump per process; connections never touch the bus.
pub async fn run_event_pump(
    mut bus_rx: broadcast::Receiver<ScoutEvent>,
    local_tx: broadcast::Sender<ScoutEvent>,
    cancel: CancellationToken,
) {
    info!("Event pump started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = bus_rx.recv() => match event {
                Ok(event) => {
                    // No receivers just means no clients right now
                    let _ = local_tx.send(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event pump lagged {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    info!("Event pump stopped");
}

/// Serve one client connection until it closes, fails a send, or the
/// server shuts down.
pub async fn serve_connection(
    mut socket: WebSocket,
    events: broadcast::Receiver<ScoutEvent>,
    registry: Arc<ConnectionRegistry>,
    keepalive: Duration,
    shutdown: CancellationToken,
) {
    let client_id = Uuid::new_v4();
    registry.add(client_id);
    info!(client_id = %client_id, "Realtime client connected");

    let connected = ServerFrame::Connected {
        message: "connected to scout realtime".to_string(),
        client_id,
        timestamp: Utc::now(),
    };
    if send_json(&mut socket, &connected).await.is_err() {
        registry.remove(client_id);
        return;
    }

    let mut events = events;
    let mut filter = SubscriptionFilter::default();
    let mut keepalive_timer = tokio::time::interval(keepalive);
    // The first tick fires immediately; skip it
    keepalive_timer.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: axum::extract::ws::close_code::NORMAL,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break;
            }

            _ = keepalive_timer.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!(client_id = %client_id, "Keepalive failed; dropping client");
                    break;
                }
            }

            event = events.recv() => match event {
                Ok(event) => {
                    if !filter.matches(&event) {
                        continue;
                    }
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        debug!(client_id = %client_id, "Send failed; dropping client");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client_id = %client_id, "Client stream lagged {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&mut socket, &mut filter, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client_id = %client_id, "Socket error: {}", e);
                    break;
                }
            },
        }
    }

    registry.remove(client_id);
    info!(client_id = %client_id, "Realtime client disconnected");
}

async fn handle_client_frame(
    socket: &mut WebSocket,
    filter: &mut SubscriptionFilter,
    text: &str,
) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Ping) => {
            let pong = ServerFrame::Pong {
                timestamp: Utc::now(),
            };
            let _ = send_json(socket, &pong).await;
        }
        Ok(ClientFrame::Subscribe {
            project_ids,
            event_types,
        }) => {
            filter.set(project_ids, event_types);
            debug!("Client subscription updated");
        }
        Ok(ClientFrame::Unsubscribe) => filter.clear(),
        Err(e) => debug!("Ignoring malformed client frame: {}", e),
    }
}

async fn send_json<T: serde::Serialize>(
    socket: &mut WebSocket,
    frame: &T,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}
