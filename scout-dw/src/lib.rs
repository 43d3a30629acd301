//! scout-dw - Discovery Watcher service
//!
//! Observes a configured root directory for project directories appearing
//! and disappearing, coalesces rapid filesystem churn per path, validates
//! candidates, and publishes stable discovery events on the bus.

pub mod scan;
pub mod watcher;

pub use watcher::{DebouncedWatcher, WatcherCommand, WatcherHealth, WatcherOptions};
