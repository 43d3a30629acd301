//! Analysis persistence
//!
//! Analyses are append-only. The insert that completes a job runs in one
//! transaction with the project's status flip to ANALYZED, so a reader can
//! never observe ANALYZED without a corresponding analysis row.

use super::models::{parse_timestamp, Analysis};
use crate::{Error, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Input for a new analysis row. JSON blobs stay opaque at this layer.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
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
}

fn analysis_from_row(row: &SqliteRow) -> Result<Analysis> {
    let id: String = row.try_get("id")?;
    let project_id: String = row.try_get("project_id")?;
    let created_at: String = row.try_get("created_at")?;
    let cache_hit: i64 = row.try_get("cache_hit")?;

    let json_column = |name: &str| -> Result<Value> {
        let raw: String = row.try_get(name)?;
        // Blobs are producer-owned; a corrupt one degrades to null
        Ok(serde_json::from_str(&raw).unwrap_or(Value::Null))
    };

    Ok(Analysis {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("bad analysis id: {e}")))?,
        project_id: Uuid::parse_str(&project_id)
            .map_err(|e| Error::Internal(format!("bad project id: {e}")))?,
        summary: row.try_get("summary")?,
        tech_stack: json_column("tech_stack")?,
        complexity: row.try_get("complexity")?,
        recommendations: json_column("recommendations")?,
        completion_score: row.try_get("completion_score")?,
        maturity_level: row.try_get("maturity_level")?,
        production_gaps: json_column("production_gaps")?,
        estimated_value: json_column("estimated_value")?,
        model: row.try_get("model")?,
        tokens_used: row.try_get("tokens_used")?,
        cache_hit: cache_hit != 0,
        created_at: parse_timestamp(&created_at),
    })
}

/// Insert the analysis and mark the project ANALYZED atomically.
pub async fn insert_completed(pool: &SqlitePool, new: &NewAnalysis) -> Result<Analysis> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO project_analyses (
            id, project_id, summary, tech_stack, complexity, recommendations,
            completion_score, maturity_level, production_gaps, estimated_value,
            model, tokens_used, cache_hit, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(new.project_id.to_string())
    .bind(&new.summary)
    .bind(new.tech_stack.to_string())
    .bind(&new.complexity)
    .bind(new.recommendations.to_string())
    .bind(new.completion_score)
    .bind(&new.maturity_level)
    .bind(new.production_gaps.to_string())
    .bind(new.estimated_value.to_string())
    .bind(&new.model)
    .bind(new.tokens_used)
    .bind(new.cache_hit as i64)
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE projects SET status = 'ANALYZED', analyzed_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(new.project_id.to_string())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let row = sqlx::query("SELECT * FROM project_analyses WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(pool)
        .await?;
    analysis_from_row(&row)
}

/// All analyses for a project, newest first
pub async fn list_for_project(pool: &SqlitePool, project_id: Uuid) -> Result<Vec<Analysis>> {
    let rows = sqlx::query(
        "SELECT * FROM project_analyses WHERE project_id = ? ORDER BY created_at DESC",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(analysis_from_row).collect()
}

pub async fn count_for_project(pool: &SqlitePool, project_id: Uuid) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM project_analyses WHERE project_id = ?")
            .bind(project_id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(count)
}
