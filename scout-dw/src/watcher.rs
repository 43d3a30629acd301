//! Debounced filesystem observation
//!
//! Raw notify events are noisy: a single `git clone` into the watch root
//! produces thousands of events for one logical "project appeared". Every
//! event is mapped to its candidate project directory (the ancestor at the
//! configured observation depth) and recorded in a per-key debounce map with
//! reset-on-write timers. A key fires only after its quiet period, and a
//! write-stabilization guard re-arms it while the directory's mtime is still
//! fresh.
//!
//! One emission per key per window, carrying the path that settled. Added
//! candidates are validated before anything reaches the bus; removals are
//! published as-is and resolved downstream.

use chrono::Utc;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use scout_common::bus::BusClient;
use scout_common::detect::{self, is_system_dir};
use scout_common::events::DiscoveryEvent;
use scout_common::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Watcher tuning knobs, resolved from configuration
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub root: PathBuf,
    pub depth: usize,
    pub debounce: Duration,
    pub stability_threshold: Duration,
    pub ignore_patterns: Vec<String>,
    pub max_permission_errors: u32,
}

/// Control commands accepted by the running watcher
#[derive(Debug)]
pub enum WatcherCommand {
    /// Immediately fire all pending debounced events
    FlushAll,
    /// Discard all pending debounced events
    CancelAll,
    /// Flush pending events, then stop; the ack fires once the flush is done
    Shutdown { ack: tokio::sync::oneshot::Sender<()> },
}

/// Observable watcher state
#[derive(Debug, Clone)]
pub struct WatcherHealth {
    pub healthy: bool,
    pub pending: usize,
    pub permission_errors: u32,
    pub events_emitted: u64,
}

impl WatcherHealth {
    fn initial() -> Self {
        Self {
            healthy: true,
            pending: 0,
            permission_errors: 0,
            events_emitted: 0,
        }
    }
}

/// Per-key debounce bookkeeping: one pending deadline per candidate path,
/// reset on every write.
struct DebounceMap {
    pending: HashMap<PathBuf, Instant>,
    debounce: Duration,
}

impl DebounceMap {
    fn new(debounce: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce,
        }
    }

    /// Record activity for a key, cancelling any pending timer for it
    fn record(&mut self, key: PathBuf) {
        self.pending.insert(key, Instant::now() + self.debounce);
    }

    /// Push a key's deadline out without resetting the full window
    fn re_arm(&mut self, key: PathBuf, delay: Duration) {
        self.pending.insert(key, Instant::now() + delay);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Keys whose deadline has passed, removed from the map
    fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &due {
            self.pending.remove(key);
        }
        due
    }

    fn take_all(&mut self) -> Vec<PathBuf> {
        self.pending.drain().map(|(key, _)| key).collect()
    }

    fn clear(&mut self) {
        self.pending.clear();
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Map an event path to the candidate project directories it belongs to:
/// the ancestors at depth 1..=`depth` below the root. Returns empty when the
/// path is the root itself or crosses an ignored component.
fn candidate_targets(
    root: &Path,
    path: &Path,
    depth: usize,
    ignore_patterns: &[String],
) -> Vec<PathBuf> {
    let Ok(relative) = path.strip_prefix(root) else {
        return Vec::new();
    };

    let mut targets = Vec::new();
    let mut current = root.to_path_buf();
    for (level, component) in relative.components().enumerate() {
        if level >= depth {
            break;
        }
        let std::path::Component::Normal(name) = component else {
            return Vec::new();
        };
        let name = name.to_string_lossy();
        if name.starts_with('.') || is_system_dir(&name) {
            return Vec::new();
        }
        if ignore_patterns.iter().any(|pattern| name.contains(pattern)) {
            return Vec::new();
        }
        current = current.join(name.as_ref());
        targets.push(current.clone());
    }
    targets
}

/// Running watcher handle
pub struct DebouncedWatcher {
    command_tx: mpsc::Sender<WatcherCommand>,
    health_rx: watch::Receiver<WatcherHealth>,
    // Dropping the notify watcher stops event delivery
    _watcher: RecommendedWatcher,
}

impl DebouncedWatcher {
    /// Start observing. The returned handle controls the background loop;
    /// the loop exits on `Shutdown` or when permission errors exceed the
    /// configured threshold.
    pub fn start(options: WatcherOptions, bus: Arc<BusClient>) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>(1024);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (health_tx, health_rx) = watch::channel(WatcherHealth::initial());

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::Internal(format!("watcher init failed: {e}")))?;

        watcher
            .watch(&options.root, RecursiveMode::Recursive)
            .map_err(|e| Error::Internal(format!("failed to watch {}: {e}", options.root.display())))?;

        info!(
            root = %options.root.display(),
            depth = options.depth,
            debounce_ms = options.debounce.as_millis() as u64,
            "Discovery watcher started"
        );

        tokio::spawn(run_watch_loop(options, bus, event_rx, command_rx, health_tx));

        Ok(Self {
            command_tx,
            health_rx,
            _watcher: watcher,
        })
    }

    pub async fn flush_all(&self) -> Result<()> {
        self.send(WatcherCommand::FlushAll).await
    }

    pub async fn cancel_all(&self) -> Result<()> {
        self.send(WatcherCommand::CancelAll).await
    }

    /// Flush pending events and stop the loop. Resolves only after the
    /// flush has completed, so callers can close the bus afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = tokio::sync::oneshot::channel();
        self.send(WatcherCommand::Shutdown { ack }).await?;
        done.await
            .map_err(|_| Error::Internal("watcher loop dropped shutdown ack".to_string()))
    }

    pub fn health_snapshot(&self) -> WatcherHealth {
        self.health_rx.borrow().clone()
    }

    async fn send(&self, command: WatcherCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::Internal("watcher loop stopped".to_string()))
    }
}

async fn run_watch_loop(
    options: WatcherOptions,
    bus: Arc<BusClient>,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut command_rx: mpsc::Receiver<WatcherCommand>,
    health_tx: watch::Sender<WatcherHealth>,
) {
    let mut map = DebounceMap::new(options.debounce);
    let mut health = WatcherHealth::initial();

    loop {
        let next_deadline = map.next_deadline();

        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        for path in &event.paths {
                            for target in candidate_targets(
                                &options.root,
                                path,
                                options.depth,
                                &options.ignore_patterns,
                            ) {
                                map.record(target);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Watcher error: {}", e);
                        if is_permission_error(&e) {
                            health.permission_errors += 1;
                        }
                    }
                }
                health.pending = map.len();
                let _ = health_tx.send(health.clone());
            }

            Some(command) = command_rx.recv() => {
                match command {
                    WatcherCommand::FlushAll => {
                        for key in map.take_all() {
                            emit(&options, &bus, &key, &mut health, None).await;
                        }
                    }
                    WatcherCommand::CancelAll => {
                        let dropped = map.len();
                        map.clear();
                        debug!("Cancelled {} pending discovery events", dropped);
                    }
                    WatcherCommand::Shutdown { ack } => {
                        for key in map.take_all() {
                            emit(&options, &bus, &key, &mut health, None).await;
                        }
                        let _ = ack.send(());
                        info!("Discovery watcher stopped");
                        break;
                    }
                }
                health.pending = map.len();
                let _ = health_tx.send(health.clone());
            }

            () = async {
                if let Some(deadline) = next_deadline {
                    tokio::time::sleep_until(deadline).await;
                }
            }, if next_deadline.is_some() => {
                for key in map.take_due(Instant::now()) {
                    emit(&options, &bus, &key, &mut health, Some(&mut map)).await;
                }
                health.pending = map.len();
                let _ = health_tx.send(health.clone());
            }

            else => break,
        }

        if health.permission_errors >= options.max_permission_errors {
            health.healthy = false;
            let _ = health_tx.send(health.clone());
            warn!(
                "Watcher unhealthy after {} permission errors; stopping",
                health.permission_errors
            );
            break;
        }
    }
}

/// Fire one settled key: existence decides added vs removed, the stability
/// guard (when `map` is given) re-arms keys still being written to, and the
/// validator gates what reaches the bus.
async fn emit(
    options: &WatcherOptions,
    bus: &BusClient,
    key: &Path,
    health: &mut WatcherHealth,
    map: Option<&mut DebounceMap>,
) {
    match std::fs::symlink_metadata(key) {
        Ok(meta) if meta.file_type().is_symlink() => {
            debug!("Ignoring symlink {}", key.display());
        }
        Ok(meta) if meta.is_dir() => {
            // Stability guard: keep waiting while the directory is still
            // changing under us (flush bypasses this by passing no map)
            if let Some(map) = map {
                if let Ok(modified) = meta.modified() {
                    if let Ok(age) = modified.elapsed() {
                        if age < options.stability_threshold {
                            debug!(
                                "Directory {} not yet stable; re-arming",
                                key.display()
                            );
                            map.re_arm(key.to_path_buf(), options.stability_threshold);
                            return;
                        }
                    }
                }
            }

            let validation = detect::validate(key);
            if !validation.valid {
                debug!(
                    "Ignoring {}: not a project (confidence {:.2})",
                    key.display(),
                    validation.confidence
                );
                return;
            }

            let event = DiscoveryEvent::Added {
                path: key.display().to_string(),
                timestamp: Utc::now(),
            };
            if let Err(e) = bus.publish_discovery(&event).await {
                warn!("Failed to publish discovery event: {}", e);
                return;
            }
            health.events_emitted += 1;
            info!(
                path = %key.display(),
                confidence = validation.confidence,
                "Project discovered"
            );
        }
        Ok(_) => {
            // Plain files at candidate depth are not projects
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            health.permission_errors += 1;
            warn!("Permission denied on {}: {}", key.display(), e);
        }
        Err(_) => {
            let event = DiscoveryEvent::Removed {
                path: key.display().to_string(),
                timestamp: Utc::now(),
            };
            if let Err(e) = bus.publish_discovery(&event).await {
                warn!("Failed to publish removal event: {}", e);
                return;
            }
            health.events_emitted += 1;
            info!(path = %key.display(), "Project directory removed");
        }
    }
}

fn is_permission_error(error: &notify::Error) -> bool {
    matches!(
        &error.kind,
        notify::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_debounce_reset_on_write() {
        tokio::time::pause();
        let mut map = DebounceMap::new(Duration::from_millis(2000));
        let key = PathBuf::from("/watch/demo");

        map.record(key.clone());
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(map.take_due(Instant::now()).is_empty());

        // A second write resets the window
        map.record(key.clone());
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(map.take_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(map.take_due(Instant::now()), vec![key]);
        assert_eq!(map.len(), 0);
    }

    #[tokio::test]
    async fn test_debounce_fires_once_per_key_per_window() {
        tokio::time::pause();
        let mut map = DebounceMap::new(Duration::from_millis(100));
        let key = PathBuf::from("/watch/demo");

        // Three rapid events within the window: one firing
        map.record(key.clone());
        map.record(key.clone());
        map.record(key.clone());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(map.take_due(Instant::now()).len(), 1);
        assert!(map.take_due(Instant::now()).is_empty());
    }

    #[tokio::test]
    async fn test_independent_keys_fire_independently() {
        tokio::time::pause();
        let mut map = DebounceMap::new(Duration::from_millis(100));

        map.record(PathBuf::from("/watch/a"));
        tokio::time::advance(Duration::from_millis(60)).await;
        map.record(PathBuf::from("/watch/b"));

        tokio::time::advance(Duration::from_millis(50)).await;
        let due = map.take_due(Instant::now());
        assert_eq!(due, vec![PathBuf::from("/watch/a")]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_candidate_targets_depth_one() {
        let root = PathBuf::from("/watch");
        let targets = candidate_targets(&root, &root.join("demo/src/index.tsx"), 1, &[]);
        assert_eq!(targets, vec![root.join("demo")]);
    }

    #[test]
    fn test_candidate_targets_depth_two() {
        let root = PathBuf::from("/watch");
        let targets = candidate_targets(&root, &root.join("org/app/src/main.rs"), 2, &[]);
        assert_eq!(targets, vec![root.join("org"), root.join("org/app")]);
    }

    #[test]
    fn test_root_itself_is_not_a_target() {
        let root = PathBuf::from("/watch");
        assert!(candidate_targets(&root, &root, 1, &[]).is_empty());
    }

    #[test]
    fn test_system_and_hidden_components_ignored() {
        let root = PathBuf::from("/watch");
        assert!(candidate_targets(&root, &root.join("node_modules/x"), 1, &[]).is_empty());
        assert!(candidate_targets(&root, &root.join(".hidden/y"), 1, &[]).is_empty());
        assert!(candidate_targets(&root, &root.join("target/debug"), 1, &[]).is_empty());
    }

    #[test]
    fn test_custom_ignore_patterns() {
        let root = PathBuf::from("/watch");
        let patterns = vec!["scratch".to_string()];
        assert!(candidate_targets(&root, &root.join("scratch-pad/x"), 1, &patterns).is_empty());
        assert!(!candidate_targets(&root, &root.join("app/x"), 1, &patterns).is_empty());
    }

    #[test]
    fn test_paths_outside_root_ignored() {
        let root = PathBuf::from("/watch");
        assert!(candidate_targets(&root, Path::new("/elsewhere/app"), 1, &[]).is_empty());
    }
}
