//! Startup reconciliation scan
//!
//! The watcher only sees changes that happen while it is running. On
//! startup, projects already present under the root are discovered by a
//! one-shot scan that publishes the same events the watcher would have.

use chrono::Utc;
use scout_common::bus::BusClient;
use scout_common::detect::{self, is_system_dir};
use scout_common::events::DiscoveryEvent;
use scout_common::Result;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Scan result counters
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub directories_seen: usize,
    pub projects_found: usize,
}

/// Walk candidate directories to `depth` and publish `project:added` for
/// every directory that validates. Errors on individual entries are
/// absorbed; only bus failures surface.
pub async fn reconcile(root: &Path, depth: usize, bus: &BusClient) -> Result<ScanStats> {
    let mut stats = ScanStats::default();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(name.starts_with('.') || is_system_dir(&name))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Scan entry error: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        stats.directories_seen += 1;

        let validation = detect::validate(entry.path());
        if !validation.valid {
            continue;
        }

        let event = DiscoveryEvent::Added {
            path: entry.path().display().to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = bus.publish_discovery(&event).await {
            warn!("Failed to publish scan discovery: {}", e);
            continue;
        }
        stats.projects_found += 1;
        debug!(
            path = %entry.path().display(),
            confidence = validation.confidence,
            "Scan discovered project"
        );
    }

    info!(
        directories = stats.directories_seen,
        projects = stats.projects_found,
        "Startup scan complete"
    );
    Ok(stats)
}
