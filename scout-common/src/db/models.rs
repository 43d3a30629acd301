//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Project lifecycle status
///
/// ```text
/// DISCOVERED → QUEUED → ANALYZING → ANALYZED | ERROR
/// ARCHIVED is a terminal sink reachable from any state;
/// reset-stuck forces ANALYZING back to DISCOVERED.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Discovered,
    Queued,
    Analyzing,
    Analyzed,
    Error,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Discovered => "DISCOVERED",
            ProjectStatus::Queued => "QUEUED",
            ProjectStatus::Analyzing => "ANALYZING",
            ProjectStatus::Analyzed => "ANALYZED",
            ProjectStatus::Error => "ERROR",
            ProjectStatus::Archived => "ARCHIVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DISCOVERED" => Some(ProjectStatus::Discovered),
            "QUEUED" => Some(ProjectStatus::Queued),
            "ANALYZING" => Some(ProjectStatus::Analyzing),
            "ANALYZED" => Some(ProjectStatus::Analyzed),
            "ERROR" => Some(ProjectStatus::Error),
            "ARCHIVED" => Some(ProjectStatus::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A discovered project. Unique, stable key is the absolute path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub framework: Option<String>,
    pub language: Option<String>,
    pub package_manager: Option<String>,
    pub file_count: i64,
    pub lines_of_code: i64,
    pub size_bytes: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub status: ProjectStatus,
    pub is_active: bool,
    pub discovered_at: DateTime<Utc>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable analysis record. Created once per completed job (cache hits
/// included, flagged via `cache_hit`), never mutated, deleted only with its
/// project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: Uuid,
    pub project_id: Uuid,
    pub summary: String,
    pub tech_stack: Value,
    pub complexity: String,
    pub recommendations: Value,
    pub completion_score: i64,
    pub maturity_level: String,
    pub production_gaps: Value,
    pub estimated_value: Value,
    pub model: String,
    pub tokens_used: i64,
    pub cache_hit: bool,
    pub created_at: DateTime<Utc>,
}

/// A tag, unique by name, shared across projects
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parse an RFC3339 timestamp column, tolerating legacy precision
pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
