//! Discovery subscriber
//!
//! Consumes discovery events from the bus and turns them into project rows:
//! an idempotent upsert keyed by path on `project:added`, archive on
//! `project:removed`. Newly created projects are enqueued for analysis;
//! re-discoveries only refresh metadata and do not re-enqueue.
//!
//! The unique index on `path` settles concurrent discoveries of the same
//! directory: the loser of the insert race waits briefly, re-reads, and
//! proceeds with the existing row.

use crate::publisher::EventPublisher;
use crate::queue::{AnalysisQueue, EnqueueOutcome, JobPayload, JobPriority};
use scout_common::db::{projects, Project, ProjectStatus};
use scout_common::detect::{self, ProjectMetadata};
use scout_common::events::DiscoveryEvent;
use scout_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait before re-reading after losing the insert race
const RACE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Outcome of the idempotent upsert
pub enum Upsert {
    Created(Project),
    Refreshed(Project),
}

/// Idempotent upsert by unique path. Returns whether the row was created or
/// refreshed; a lost insert race resolves to the winner's row.
pub async fn upsert_project(
    db: &SqlitePool,
    path: &str,
    meta: &ProjectMetadata,
) -> Result<Upsert> {
    if let Some(existing) = projects::find_by_path(db, path).await? {
        projects::update_on_rediscovery(db, existing.id, meta).await?;
        let refreshed = projects::find_by_id(db, existing.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {}", existing.id)))?;
        return Ok(Upsert::Refreshed(refreshed));
    }

    match projects::insert_discovered(db, meta).await {
        Ok(project) => Ok(Upsert::Created(project)),
        Err(e) if e.is_unique_violation() => {
            debug!(path = %path, "Lost discovery race; re-reading");
            tokio::time::sleep(RACE_RETRY_DELAY).await;
            let existing = projects::find_by_path(db, path)
                .await?
                .ok_or_else(|| Error::NotFound(format!("project at {path}")))?;
            Ok(Upsert::Refreshed(existing))
        }
        Err(e) => Err(e),
    }
}

/// Archive the project at a removed path. Unknown paths are logged and
/// dropped; the archived row is returned for event publication.
pub async fn archive_removed(db: &SqlitePool, path: &str) -> Result<Option<Project>> {
    let archived = projects::archive_by_path(db, path).await?;
    if archived.is_none() {
        warn!(path = %path, "Removal for unknown project; dropping");
    }
    Ok(archived)
}

/// Enqueue an analysis job for a project and move it to QUEUED.
///
/// When a job for the project is already waiting, active or delayed and
/// `force_refresh` is false, the queue hands back the in-flight job instead
/// of accepting a duplicate; the project's status is left to the running
/// pipeline in that case.
pub async fn enqueue_analysis(
    db: &SqlitePool,
    queue: &AnalysisQueue,
    project: &Project,
    priority: JobPriority,
    force_refresh: bool,
) -> Result<EnqueueOutcome> {
    let outcome = queue
        .enqueue(JobPayload {
            project_id: project.id,
            project_path: project.path.clone(),
            project_name: project.name.clone(),
            priority,
            force_refresh,
        })
        .await?;

    match &outcome {
        EnqueueOutcome::Enqueued(job_id) => {
            projects::set_status(db, project.id, ProjectStatus::Queued).await?;
            debug!(job_id = %job_id, project = %project.name, "Analysis enqueued");
        }
        EnqueueOutcome::AlreadyQueued(job_id) => {
            debug!(
                job_id = %job_id,
                project = %project.name,
                "Analysis already in flight; not enqueuing a duplicate"
            );
        }
    }
    Ok(outcome)
}

pub struct DiscoverySubscriber {
    db: SqlitePool,
    queue: AnalysisQueue,
    publisher: EventPublisher,
}

impl DiscoverySubscriber {
    pub fn new(db: SqlitePool, queue: AnalysisQueue, publisher: EventPublisher) -> Self {
        Self {
            db,
            queue,
            publisher,
        }
    }

    /// Consume discovery events until cancelled or the channel closes
    pub async fn run(
        &self,
        mut rx: broadcast::Receiver<DiscoveryEvent>,
        cancel: CancellationToken,
    ) {
        info!("Discovery subscriber started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.handle(event).await {
                            warn!("Discovery event handling failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Discovery subscriber lagged {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        info!("Discovery subscriber stopped");
    }

    pub async fn handle(&self, event: DiscoveryEvent) -> Result<()> {
        match event {
            DiscoveryEvent::Added { path, .. } => self.handle_added(&path).await,
            DiscoveryEvent::Removed { path, .. } => self.handle_removed(&path).await,
        }
    }

    async fn handle_added(&self, path: &str) -> Result<()> {
        // The directory may have vanished between debounce and delivery
        let path_buf = PathBuf::from(path);
        if !path_buf.is_dir() {
            debug!(path = %path, "Discovered path no longer exists; dropping");
            return Ok(());
        }

        // Metadata extraction walks the filesystem; keep it off the runtime
        let meta = tokio::task::spawn_blocking(move || detect::extract(&path_buf))
            .await
            .map_err(|e| Error::Internal(format!("metadata task panicked: {e}")))?;

        if !meta.validation.valid {
            debug!(path = %path, "Path no longer validates as a project; dropping");
            return Ok(());
        }

        match upsert_project(&self.db, path, &meta).await? {
            Upsert::Created(project) => {
                self.publisher.project_added(&project).await;
                info!(path = %path, id = %project.id, "Project created");

                // Fresh projects go straight into the analysis queue
                enqueue_analysis(&self.db, &self.queue, &project, JobPriority::Normal, false)
                    .await?;
            }
            Upsert::Refreshed(project) => {
                self.publisher.project_updated(&project).await;
                debug!(path = %path, "Project re-discovered");
            }
        }
        Ok(())
    }

    async fn handle_removed(&self, path: &str) -> Result<()> {
        if let Some(project) = archive_removed(&self.db, path).await? {
            self.publisher.project_removed(&project).await;
            info!(path = %path, id = %project.id, "Project archived");
        }
        Ok(())
    }
}
