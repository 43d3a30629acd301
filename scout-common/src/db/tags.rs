//! Tag persistence. Tags are off the analysis critical path; this covers the
//! operations the data-model invariants need.

use super::models::{parse_timestamp, Tag};
use crate::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Find or create a tag by its unique name
pub async fn ensure(pool: &SqlitePool, name: &str, color: Option<&str>) -> Result<Tag> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO tags (id, name, color, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            color = COALESCE(excluded.color, tags.color),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(color)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM tags WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;

    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Tag {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("bad tag id: {e}")))?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

/// Attach a tag to a project (idempotent)
pub async fn attach(pool: &SqlitePool, project_id: Uuid, tag_id: Uuid) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO project_tags (project_id, tag_id) VALUES (?, ?)")
        .bind(project_id.to_string())
        .bind(tag_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Tag names attached to a project
pub async fn names_for_project(pool: &SqlitePool, project_id: Uuid) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT t.name FROM tags t
        JOIN project_tags pt ON pt.tag_id = t.id
        WHERE pt.project_id = ?
        ORDER BY t.name
        "#,
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| row.try_get::<String, _>("name").map_err(Error::from))
        .collect()
}
