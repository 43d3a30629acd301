//! Operator HTTP surface for the analysis worker
//!
//! Queue administration, cache maintenance and the stuck-project reset.
//! The project/tag CRUD surface lives elsewhere; this service only exposes
//! what operating the pipeline requires.

use crate::processor::CancelRegistry;
use crate::publisher::EventPublisher;
use crate::queue::{AnalysisQueue, JobPriority};
use crate::subscriber::enqueue_analysis;
use crate::cache::ResultCache;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use scout_common::db::projects;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. deleting an active job
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<scout_common::Error> for ApiError {
    fn from(error: scout_common::Error) -> Self {
        match error {
            scout_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            scout_common::Error::Conflict(msg) => ApiError::Conflict(msg),
            scout_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let body = Json(json!({ "error": code, "message": self.to_string() }));
        (status, body).into_response()
    }
}

/// Shared state for the ops router
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub queue: AnalysisQueue,
    pub cache: ResultCache,
    pub registry: Arc<CancelRegistry>,
    pub publisher: EventPublisher,
}

/// Build the worker's ops router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/queue/stats", get(queue_stats))
        .route("/queue/jobs/{id}", get(get_job).delete(delete_job))
        .route("/queue/jobs/{id}/force", delete(force_delete_job))
        .route("/queue/pause", post(pause_queue))
        .route("/queue/resume", post(resume_queue))
        .route("/queue/clear", post(clear_queue))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear-expired", post(cache_clear_expired))
        .route("/admin/reset-stuck", post(reset_stuck))
        .route("/projects/{id}/analyze", post(analyze_project))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let db_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();
    let cache_ok = state.cache.healthy().await;
    let counts = state.queue.counts().await.ok();

    Ok(Json(json!({
        "service": "scout-aw",
        "healthy": db_ok && cache_ok,
        "database": db_ok,
        "cache": cache_ok,
        "queue": counts,
        "active_jobs": state.registry.active_count(),
    })))
}

async fn queue_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let counts = state.queue.counts().await.map_err(ApiError::from)?;
    let paused = state.queue.is_paused().await.map_err(ApiError::from)?;
    Ok(Json(json!({ "counts": counts, "paused": paused })))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let detail = state
        .queue
        .job_detail(&id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;
    Ok(Json(json!(detail)))
}

/// Normal delete: refuses active jobs with a conflict
async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.queue.remove(&id).await.map_err(ApiError::from)?;
    if !removed {
        return Err(ApiError::NotFound(format!("job {id}")));
    }
    Ok(Json(json!({ "removed": id })))
}

/// Force delete: marks an active job failed, removes it, and asks the
/// owning worker to stop (honoured at its next await boundary)
async fn force_delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let interrupted = state.registry.cancel(&id);
    let removed = state.queue.force_delete(&id).await.map_err(ApiError::from)?;
    if !removed {
        return Err(ApiError::NotFound(format!("job {id}")));
    }
    Ok(Json(json!({ "removed": id, "interrupted": interrupted })))
}

async fn pause_queue(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.queue.pause().await.map_err(ApiError::from)?;
    Ok(Json(json!({ "paused": true })))
}

async fn resume_queue(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.queue.resume().await.map_err(ApiError::from)?;
    Ok(Json(json!({ "paused": false })))
}

async fn clear_queue(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.queue.clear().await.map_err(ApiError::from)?;
    Ok(Json(json!({ "removed": removed })))
}

async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.cache.stats().await;
    Json(json!(stats))
}

async fn cache_clear_expired(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.cache.clear_expired().await;
    Json(json!({ "removed": removed }))
}

/// Force every ANALYZING project back to DISCOVERED, clear its queued jobs
/// and interrupt its running ones.
async fn reset_stuck(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let project_ids = projects::reset_stuck(&state.db).await.map_err(ApiError::from)?;

    let mut jobs_cleared = 0;
    let mut interrupted = 0;
    for project_id in &project_ids {
        jobs_cleared += state
            .queue
            .remove_for_project(*project_id)
            .await
            .map_err(ApiError::from)?;
        interrupted += state.registry.cancel_for_project(*project_id);
    }

    info!(
        projects = project_ids.len(),
        jobs_cleared, interrupted, "Reset-stuck complete"
    );
    Ok(Json(json!({
        "projects": project_ids,
        "jobsCleared": jobs_cleared,
        "interrupted": interrupted,
    })))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct AnalyzeRequest {
    priority: Option<JobPriority>,
    force_refresh: bool,
}

/// Enqueue an analysis job for a project. When one is already in flight
/// and the request is not a force refresh, the existing job id is returned
/// instead of a duplicate.
async fn analyze_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<AnalyzeRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let project = projects::find_by_id(&state.db, id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("project {id}")))?;

    let outcome = enqueue_analysis(
        &state.db,
        &state.queue,
        &project,
        request.priority.unwrap_or(JobPriority::Normal),
        request.force_refresh,
    )
    .await
    .map_err(ApiError::from)?;

    Ok(Json(json!({
        "jobId": outcome.job_id(),
        "alreadyQueued": outcome.is_duplicate(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_mapping() {
        let cases = vec![
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                ApiError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_common_error_conversion_preserves_conflict() {
        let conflict = scout_common::Error::Conflict("job active".into());
        assert!(matches!(ApiError::from(conflict), ApiError::Conflict(_)));
    }

    #[test]
    fn test_analyze_request_defaults() {
        let request: AnalyzeRequest = serde_json::from_str("{}").unwrap();
        assert!(request.priority.is_none());
        assert!(!request.force_refresh);

        let request: AnalyzeRequest =
            serde_json::from_str(r#"{"priority":"high","forceRefresh":true}"#).unwrap();
        assert_eq!(request.priority, Some(JobPriority::High));
        assert!(request.force_refresh);
    }
}
