//! Event bus client
//!
//! Publish/subscribe over Redis pub/sub with two reliability affordances:
//!
//! - a bounded FIFO outbox that buffers publishes while the connection is
//!   down and flushes in order on reconnect (oldest entries are dropped,
//!   with a log line, once the outbox is full);
//! - a reconnect loop with exponential backoff capped at 2 seconds.
//!
//! Delivery is at-least-once to currently-connected subscribers and
//! best-effort to late joiners; the bus is not durable across long
//! disconnects.
//!
//! Subscribers get typed events: a single adapter task per topic converts
//! the wire JSON into `DiscoveryEvent` / `ScoutEvent` and feeds an
//! in-process broadcast channel, so the rest of the system never touches
//! raw payloads.

use crate::events::{DiscoveryEvent, ScoutEvent, TOPIC_DISCOVERY, TOPIC_LIFECYCLE};
use crate::{Error, Result};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

/// Redis channel prefix for all bus topics
const CHANNEL_PREFIX: &str = "scout:events:";

/// Outbox capacity; the oldest entry is dropped beyond this
const OUTBOX_CAPACITY: usize = 1000;

/// Reconnect backoff bounds
const RECONNECT_INITIAL: Duration = Duration::from_millis(100);
const RECONNECT_MAX: Duration = Duration::from_secs(2);

/// Broadcast capacity for typed subscriber channels
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

/// Bounded FIFO buffer for publishes made while disconnected
struct Outbox {
    entries: VecDeque<(String, String)>,
    capacity: usize,
    dropped: u64,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Returns true when the push evicted the oldest entry
    fn push(&mut self, channel: String, payload: String) -> bool {
        let mut evicted = false;
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
            evicted = true;
        }
        self.entries.push_back((channel, payload));
        evicted
    }

    fn drain(&mut self) -> Vec<(String, String)> {
        self.entries.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Next reconnect delay: doubled, capped at [`RECONNECT_MAX`]
fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_MAX)
}

/// Event bus client handle. Cheap to clone via `Arc`.
pub struct BusClient {
    redis_url: String,
    conn: tokio::sync::Mutex<Option<ConnectionManager>>,
    outbox: Mutex<Outbox>,
    ready: AtomicBool,
    reconnect_kick: Notify,
}

impl BusClient {
    /// Connect to the bus. Fails when the initial connection cannot be
    /// established; later disconnects are handled by the reconnect loop.
    pub async fn connect(redis_url: &str) -> Result<Arc<Self>> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        let bus = Arc::new(Self {
            redis_url: redis_url.to_string(),
            conn: tokio::sync::Mutex::new(Some(manager)),
            outbox: Mutex::new(Outbox::new(OUTBOX_CAPACITY)),
            ready: AtomicBool::new(true),
            reconnect_kick: Notify::new(),
        });

        tokio::spawn(reconnect_loop(bus.clone()));
        info!("Bus client connected: {}", redis_url);
        Ok(bus)
    }

    /// True iff the underlying connection is believed healthy
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Buffered publish count (diagnostics)
    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().expect("outbox lock poisoned").len()
    }

    /// Publish a discovery event (watcher → subscriber)
    pub async fn publish_discovery(&self, event: &DiscoveryEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.publish(TOPIC_DISCOVERY, payload).await
    }

    /// Publish a lifecycle event (subscriber/workers → fan-out)
    pub async fn publish_lifecycle(&self, event: &ScoutEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.publish(TOPIC_LIFECYCLE, payload).await
    }

    /// Publish a raw payload on a topic. Never fails outright: while
    /// disconnected the payload enters the outbox.
    pub async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        let channel = format!("{}{}", CHANNEL_PREFIX, topic);

        if self.is_ready() {
            let mut guard = self.conn.lock().await;
            if let Some(conn) = guard.as_mut() {
                match conn.publish::<_, _, i64>(&channel, &payload).await {
                    Ok(_) => return Ok(()),
                    Err(e) => {
                        warn!("Bus publish failed, buffering: {}", e);
                        self.ready.store(false, Ordering::SeqCst);
                        self.reconnect_kick.notify_one();
                    }
                }
            }
        }

        self.buffer(channel, payload);
        Ok(())
    }

    fn buffer(&self, channel: String, payload: String) {
        let dropped_total = {
            let mut outbox = self.outbox.lock().expect("outbox lock poisoned");
            if outbox.push(channel, payload) {
                Some(outbox.dropped)
            } else {
                None
            }
        };
        if let Some(total) = dropped_total {
            warn!(
                "Bus outbox full ({}); dropped oldest event ({} dropped so far)",
                OUTBOX_CAPACITY, total
            );
        }
    }

    /// Subscribe to discovery events as typed messages
    pub fn subscribe_discovery(self: &Arc<Self>) -> broadcast::Receiver<DiscoveryEvent> {
        let (tx, rx) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        spawn_typed_listener(self.redis_url.clone(), TOPIC_DISCOVERY, tx);
        rx
    }

    /// Subscribe to lifecycle events as typed messages
    pub fn subscribe_lifecycle(self: &Arc<Self>) -> broadcast::Receiver<ScoutEvent> {
        let (tx, rx) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        spawn_typed_listener(self.redis_url.clone(), TOPIC_LIFECYCLE, tx);
        rx
    }
}

/// Re-establishes the publisher connection after failures and flushes the
/// outbox in order once the connection is back.
async fn reconnect_loop(bus: Arc<BusClient>) {
    loop {
        bus.reconnect_kick.notified().await;

        let mut backoff = RECONNECT_INITIAL;
        loop {
            tokio::time::sleep(backoff).await;

            match try_reconnect(&bus).await {
                Ok(()) => {
                    bus.ready.store(true, Ordering::SeqCst);
                    flush_outbox(&bus).await;
                    info!("Bus reconnected");
                    break;
                }
                Err(e) => {
                    debug!("Bus reconnect attempt failed: {}", e);
                    backoff = next_backoff(backoff);
                }
            }
        }
    }
}

async fn try_reconnect(bus: &BusClient) -> Result<()> {
    let client = redis::Client::open(bus.redis_url.as_str())?;
    let mut manager = ConnectionManager::new(client).await?;
    redis::cmd("PING")
        .query_async::<String>(&mut manager)
        .await?;
    *bus.conn.lock().await = Some(manager);
    Ok(())
}

async fn flush_outbox(bus: &BusClient) {
    let pending = {
        let mut outbox = bus.outbox.lock().expect("outbox lock poisoned");
        outbox.drain()
    };
    if pending.is_empty() {
        return;
    }

    info!("Flushing {} buffered bus events", pending.len());
    let mut guard = bus.conn.lock().await;
    let Some(conn) = guard.as_mut() else {
        return;
    };
    let mut pending = pending.into_iter();
    while let Some((channel, payload)) = pending.next() {
        if let Err(e) = conn.publish::<_, _, i64>(&channel, &payload).await {
            warn!("Bus flush failed, re-buffering: {}", e);
            bus.ready.store(false, Ordering::SeqCst);
            drop(guard);
            // Keep order: the failed entry first, then everything unsent
            bus.buffer(channel, payload);
            for (channel, payload) in pending {
                bus.buffer(channel, payload);
            }
            bus.reconnect_kick.notify_one();
            return;
        }
    }
}

/// One adapter task per subscription: raw payloads in, typed events out.
fn spawn_typed_listener<T>(redis_url: String, topic: &'static str, tx: broadcast::Sender<T>)
where
    T: serde::de::DeserializeOwned + Clone + Send + 'static,
{
    tokio::spawn(async move {
        let channel = format!("{}{}", CHANNEL_PREFIX, topic);
        let mut backoff = RECONNECT_INITIAL;

        loop {
            match listen_once::<T>(&redis_url, &channel, &tx).await {
                Ok(()) => {
                    // Stream ended (server closed); retry from scratch
                    backoff = RECONNECT_INITIAL;
                }
                Err(e) => {
                    debug!("Bus subscriber on {} disconnected: {}", channel, e);
                    backoff = next_backoff(backoff);
                }
            }

            if tx.receiver_count() == 0 {
                debug!("No receivers left for {}; stopping listener", channel);
                break;
            }
            tokio::time::sleep(backoff).await;
        }
    });
}

async fn listen_once<T>(
    redis_url: &str,
    channel: &str,
    tx: &broadcast::Sender<T>,
) -> Result<()>
where
    T: serde::de::DeserializeOwned + Clone + Send + 'static,
{
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    debug!("Bus subscriber listening on {}", channel);

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Bus message payload unreadable: {}", e);
                continue;
            }
        };
        match serde_json::from_str::<T>(&payload) {
            Ok(event) => {
                // Send fails only when all receivers are gone
                if tx.send(event).is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                warn!("Bus message failed to parse on {}: {}", channel, e);
            }
        }
    }

    Err(Error::Internal("pubsub stream ended".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_preserves_fifo_order() {
        let mut outbox = Outbox::new(10);
        outbox.push("c".to_string(), "first".to_string());
        outbox.push("c".to_string(), "second".to_string());
        outbox.push("c".to_string(), "third".to_string());

        let drained: Vec<String> = outbox.drain().into_iter().map(|(_, p)| p).collect();
        assert_eq!(drained, vec!["first", "second", "third"]);
        assert_eq!(outbox.len(), 0);
    }

    #[test]
    fn test_outbox_drops_oldest_when_full() {
        let mut outbox = Outbox::new(3);
        assert!(!outbox.push("c".to_string(), "1".to_string()));
        assert!(!outbox.push("c".to_string(), "2".to_string()));
        assert!(!outbox.push("c".to_string(), "3".to_string()));
        assert!(outbox.push("c".to_string(), "4".to_string()));

        assert_eq!(outbox.dropped, 1);
        let drained: Vec<String> = outbox.drain().into_iter().map(|(_, p)| p).collect();
        assert_eq!(drained, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_backoff_doubles_and_caps_at_two_seconds() {
        let mut backoff = RECONNECT_INITIAL;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff);
            backoff = next_backoff(backoff);
        }
        assert_eq!(seen[0], Duration::from_millis(100));
        assert_eq!(seen[1], Duration::from_millis(200));
        assert_eq!(seen[2], Duration::from_millis(400));
        assert!(seen.iter().all(|d| *d <= RECONNECT_MAX));
        assert_eq!(backoff, RECONNECT_MAX);
    }
}
