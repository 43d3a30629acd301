//! Project persistence
//!
//! The unique index on `path` is the concurrency guard for discovery races:
//! inserts surface the unique violation to the caller, which re-reads and
//! treats the existing row as authoritative.

use super::models::{parse_timestamp, Project, ProjectStatus};
use crate::detect::ProjectMetadata;
use crate::{Error, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let discovered_at: String = row.try_get("discovered_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let analyzed_at: Option<String> = row.try_get("analyzed_at")?;
    let last_modified: Option<String> = row.try_get("last_modified")?;
    let is_active: i64 = row.try_get("is_active")?;

    Ok(Project {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("bad project id: {e}")))?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        description: row.try_get("description")?,
        framework: row.try_get("framework")?,
        language: row.try_get("language")?,
        package_manager: row.try_get("package_manager")?,
        file_count: row.try_get("file_count")?,
        lines_of_code: row.try_get("lines_of_code")?,
        size_bytes: row.try_get("size_bytes")?,
        last_modified: last_modified.as_deref().map(parse_timestamp),
        status: ProjectStatus::parse(&status).unwrap_or(ProjectStatus::Discovered),
        is_active: is_active != 0,
        discovered_at: parse_timestamp(&discovered_at),
        analyzed_at: analyzed_at.as_deref().map(parse_timestamp),
        updated_at: parse_timestamp(&updated_at),
    })
}

/// Insert a newly discovered project with status DISCOVERED.
///
/// A concurrent discovery of the same path surfaces as a unique-constraint
/// error (`Error::is_unique_violation`); callers re-read by path.
pub async fn insert_discovered(pool: &SqlitePool, meta: &ProjectMetadata) -> Result<Project> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO projects (
            id, name, path, description, framework, language, package_manager,
            file_count, lines_of_code, size_bytes, last_modified,
            status, is_active, discovered_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'DISCOVERED', 1, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&meta.name)
    .bind(meta.path.display().to_string())
    .bind(&meta.description)
    .bind(&meta.validation.framework)
    .bind(&meta.language)
    .bind(&meta.validation.package_manager)
    .bind(meta.file_count as i64)
    .bind(meta.lines_of_code as i64)
    .bind(meta.size_bytes as i64)
    .bind(meta.last_modified.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    find_by_id(pool, id)
        .await?
        .ok_or_else(|| Error::Internal("project vanished after insert".to_string()))
}

pub async fn find_by_path(pool: &SqlitePool, path: &str) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT * FROM projects WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    row.map(|r| project_from_row(&r)).transpose()
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(|r| project_from_row(&r)).transpose()
}

/// Refresh descriptive fields on re-discovery and re-activate the row.
///
/// The status moves back to DISCOVERED except while the project is QUEUED or
/// ANALYZING, which the pipeline owns.
pub async fn update_on_rediscovery(
    pool: &SqlitePool,
    id: Uuid,
    meta: &ProjectMetadata,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE projects SET
            name = ?,
            description = COALESCE(?, description),
            framework = ?,
            language = ?,
            package_manager = ?,
            file_count = ?,
            lines_of_code = ?,
            size_bytes = ?,
            last_modified = ?,
            is_active = 1,
            status = CASE WHEN status IN ('QUEUED', 'ANALYZING') THEN status ELSE 'DISCOVERED' END,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&meta.name)
    .bind(&meta.description)
    .bind(&meta.validation.framework)
    .bind(&meta.language)
    .bind(&meta.validation.package_manager)
    .bind(meta.file_count as i64)
    .bind(meta.lines_of_code as i64)
    .bind(meta.size_bytes as i64)
    .bind(meta.last_modified.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Move a project to a new status
pub async fn set_status(pool: &SqlitePool, id: Uuid, status: ProjectStatus) -> Result<()> {
    sqlx::query("UPDATE projects SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Archive the project at `path`: is_active = false, status = ARCHIVED.
/// Returns the row, or None when no project lives at that path.
pub async fn archive_by_path(pool: &SqlitePool, path: &str) -> Result<Option<Project>> {
    let Some(project) = find_by_path(pool, path).await? else {
        return Ok(None);
    };

    sqlx::query(
        "UPDATE projects SET is_active = 0, status = 'ARCHIVED', updated_at = ? WHERE id = ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(project.id.to_string())
    .execute(pool)
    .await?;

    find_by_id(pool, project.id).await
}

/// Update traversal statistics mid-pipeline (worker step 5)
pub async fn update_stats(
    pool: &SqlitePool,
    id: Uuid,
    file_count: u64,
    lines_of_code: u64,
    size_bytes: u64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE projects SET file_count = ?, lines_of_code = ?, size_bytes = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(file_count as i64)
    .bind(lines_of_code as i64)
    .bind(size_bytes as i64)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Optimistic update of operator-editable fields: applies only when
/// `updated_at` still matches the value the caller read. Returns false when
/// a concurrent write won.
pub async fn update_details_if_unchanged(
    pool: &SqlitePool,
    id: Uuid,
    name: &str,
    description: Option<&str>,
    expected_updated_at: chrono::DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE projects SET name = ?, description = ?, updated_at = ?
        WHERE id = ? AND updated_at = ?
        "#,
    )
    .bind(name)
    .bind(description)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(expected_updated_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Operator reset: force every ANALYZING project back to DISCOVERED.
/// Returns the affected project ids so the caller can clear queue entries.
pub async fn reset_stuck(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query("SELECT id FROM projects WHERE status = 'ANALYZING'")
        .fetch_all(&mut *tx)
        .await?;
    let ids: Vec<Uuid> = rows
        .iter()
        .filter_map(|row| {
            row.try_get::<String, _>("id")
                .ok()
                .and_then(|s| Uuid::parse_str(&s).ok())
        })
        .collect();

    sqlx::query(
        "UPDATE projects SET status = 'DISCOVERED', updated_at = ? WHERE status = 'ANALYZING'",
    )
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(ids)
}

/// Admin cleanup: delete rows left inactive by removal/archival.
/// Cascades to their analyses.
pub async fn delete_inactive(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM projects WHERE is_active = 0")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
