//! Event types for the Scout event system
//!
//! Two families of events travel over the bus:
//!
//! - [`DiscoveryEvent`]: emitted by the discovery watcher on the `discovery`
//!   topic, keyed by filesystem path (no project row exists yet).
//! - [`ScoutEvent`]: project lifecycle and analysis events emitted by the
//!   subscriber and the worker pool on the `lifecycle` topic, fanned out to
//!   realtime clients verbatim.
//!
//! Both serialize to the wire envelope consumed by clients:
//! `{"type": "...", "projectId": ..., "data": ..., "timestamp": ...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Bus topic carrying [`DiscoveryEvent`]s (watcher → subscriber).
pub const TOPIC_DISCOVERY: &str = "discovery";

/// Bus topic carrying [`ScoutEvent`]s (subscriber/workers → realtime fan-out).
pub const TOPIC_LIFECYCLE: &str = "lifecycle";

/// Filesystem discovery events, keyed by absolute path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DiscoveryEvent {
    /// A directory settled into existence under the watch root
    #[serde(rename = "project:added")]
    Added {
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// A previously-seen directory disappeared from the watch root
    #[serde(rename = "project:removed")]
    Removed {
        path: String,
        timestamp: DateTime<Utc>,
    },
}

impl DiscoveryEvent {
    /// The settled path this event refers to
    pub fn path(&self) -> &str {
        match self {
            DiscoveryEvent::Added { path, .. } | DiscoveryEvent::Removed { path, .. } => path,
        }
    }
}

/// Project lifecycle and analysis events.
///
/// `data` is an opaque JSON blob whose shape is decided by the producer;
/// clients parse it defensively. Event ordering is guaranteed per job
/// (`started` before any `progress` before the terminal event) but not
/// across unrelated projects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScoutEvent {
    #[serde(rename = "project:added")]
    ProjectAdded {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        data: Value,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "project:updated")]
    ProjectUpdated {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        data: Value,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "project:removed")]
    ProjectRemoved {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        data: Value,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "analysis:started")]
    AnalysisStarted {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        data: Value,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "analysis:progress")]
    AnalysisProgress {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        data: Value,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "analysis:completed")]
    AnalysisCompleted {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        data: Value,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "analysis:failed")]
    AnalysisFailed {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        data: Value,
        timestamp: DateTime<Utc>,
    },
}

impl ScoutEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ScoutEvent::ProjectAdded { .. } => "project:added",
            ScoutEvent::ProjectUpdated { .. } => "project:updated",
            ScoutEvent::ProjectRemoved { .. } => "project:removed",
            ScoutEvent::AnalysisStarted { .. } => "analysis:started",
            ScoutEvent::AnalysisProgress { .. } => "analysis:progress",
            ScoutEvent::AnalysisCompleted { .. } => "analysis:completed",
            ScoutEvent::AnalysisFailed { .. } => "analysis:failed",
        }
    }

    /// The project this event refers to
    pub fn project_id(&self) -> Uuid {
        match self {
            ScoutEvent::ProjectAdded { project_id, .. }
            | ScoutEvent::ProjectUpdated { project_id, .. }
            | ScoutEvent::ProjectRemoved { project_id, .. }
            | ScoutEvent::AnalysisStarted { project_id, .. }
            | ScoutEvent::AnalysisProgress { project_id, .. }
            | ScoutEvent::AnalysisCompleted { project_id, .. }
            | ScoutEvent::AnalysisFailed { project_id, .. } => *project_id,
        }
    }
}

/// Progress payload carried in the `data` field of `analysis:progress` events
/// and mirrored into the job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    /// Current pipeline stage (`queued`, `extracting`, `analyzing`,
    /// `caching`, `completed`, `failed`)
    pub status: String,
    /// Completion percentage, 0-100
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgress {
    pub fn stage(status: &str, percent: u8) -> Self {
        Self {
            status: status.to_string(),
            percent,
            message: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            percent: 0,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_event_wire_format() {
        let event = DiscoveryEvent::Added {
            path: "/projects/demo".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"type\":\"project:added\""));
        assert!(json.contains("\"path\":\"/projects/demo\""));

        let back: DiscoveryEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.path(), "/projects/demo");
    }

    #[test]
    fn test_lifecycle_event_envelope() {
        let project_id = Uuid::new_v4();
        let event = ScoutEvent::AnalysisCompleted {
            project_id,
            data: serde_json::json!({ "cacheHit": true }),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"type\":\"analysis:completed\""));
        assert!(json.contains(&format!("\"projectId\":\"{}\"", project_id)));
        assert!(json.contains("\"cacheHit\":true"));

        let back: ScoutEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.event_type(), "analysis:completed");
        assert_eq!(back.project_id(), project_id);
    }

    #[test]
    fn test_event_type_covers_all_variants() {
        let project_id = Uuid::new_v4();
        let ts = Utc::now();
        let data = Value::Null;

        let cases = vec![
            (
                ScoutEvent::ProjectAdded { project_id, data: data.clone(), timestamp: ts },
                "project:added",
            ),
            (
                ScoutEvent::ProjectUpdated { project_id, data: data.clone(), timestamp: ts },
                "project:updated",
            ),
            (
                ScoutEvent::ProjectRemoved { project_id, data: data.clone(), timestamp: ts },
                "project:removed",
            ),
            (
                ScoutEvent::AnalysisStarted { project_id, data: data.clone(), timestamp: ts },
                "analysis:started",
            ),
            (
                ScoutEvent::AnalysisProgress { project_id, data: data.clone(), timestamp: ts },
                "analysis:progress",
            ),
            (
                ScoutEvent::AnalysisFailed { project_id, data, timestamp: ts },
                "analysis:failed",
            ),
        ];

        for (event, expected) in cases {
            assert_eq!(event.event_type(), expected);
        }
    }

    #[test]
    fn test_progress_serialization_omits_empty_fields() {
        let progress = JobProgress::stage("extracting", 20);
        let json = serde_json::to_string(&progress).expect("serialize");
        assert!(json.contains("\"status\":\"extracting\""));
        assert!(json.contains("\"percent\":20"));
        assert!(!json.contains("message"));
        assert!(!json.contains("error"));

        let failed = JobProgress::failed("context extraction timed out");
        let json = serde_json::to_string(&failed).expect("serialize");
        assert!(json.contains("\"error\":\"context extraction timed out\""));
        assert!(json.contains("\"percent\":0"));
    }
}
