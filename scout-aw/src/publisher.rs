//! Lifecycle event publishing
//!
//! Single seam through which the subscriber and the worker pool emit
//! lifecycle events. Every event goes to an in-process broadcast channel
//! (observable by tests and local consumers) and, when a bus client is
//! attached, to the bus for the realtime fan-out.

use chrono::Utc;
use scout_common::bus::BusClient;
use scout_common::db::{Analysis, Project};
use scout_common::events::{JobProgress, ScoutEvent};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

const LOCAL_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventPublisher {
    bus: Option<Arc<BusClient>>,
    local: broadcast::Sender<ScoutEvent>,
}

impl EventPublisher {
    pub fn new(bus: Arc<BusClient>) -> Self {
        let (local, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        Self {
            bus: Some(bus),
            local,
        }
    }

    /// Publisher without a bus; events stay in-process. Used by tests.
    pub fn detached() -> Self {
        let (local, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        Self { bus: None, local }
    }

    /// Observe every event this publisher emits
    pub fn subscribe(&self) -> broadcast::Receiver<ScoutEvent> {
        self.local.subscribe()
    }

    pub async fn project_added(&self, project: &Project) {
        self.emit(ScoutEvent::ProjectAdded {
            project_id: project.id,
            data: json!(project),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn project_updated(&self, project: &Project) {
        self.emit(ScoutEvent::ProjectUpdated {
            project_id: project.id,
            data: json!(project),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn project_removed(&self, project: &Project) {
        self.emit(ScoutEvent::ProjectRemoved {
            project_id: project.id,
            data: json!({ "path": project.path }),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn analysis_started(&self, project_id: Uuid, job_id: &str) {
        self.emit(ScoutEvent::AnalysisStarted {
            project_id,
            data: json!({ "jobId": job_id }),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn analysis_progress(&self, project_id: Uuid, progress: &JobProgress) {
        self.emit(ScoutEvent::AnalysisProgress {
            project_id,
            data: json!(progress),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn analysis_completed(&self, project_id: Uuid, analysis: &Analysis) {
        self.emit(ScoutEvent::AnalysisCompleted {
            project_id,
            data: json!({
                "analysisId": analysis.id,
                "cacheHit": analysis.cache_hit,
                "completionScore": analysis.completion_score,
                "complexity": analysis.complexity,
                "maturityLevel": analysis.maturity_level,
            }),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn analysis_failed(&self, project_id: Uuid, job_id: &str, reason: &str) {
        self.emit(ScoutEvent::AnalysisFailed {
            project_id,
            data: json!({ "jobId": job_id, "error": reason }),
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn emit(&self, event: ScoutEvent) {
        // Local observers are best-effort
        let _ = self.local.send(event.clone());

        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish_lifecycle(&event).await {
                warn!("Failed to publish {} to bus: {}", event.event_type(), e);
            }
        }
    }
}
