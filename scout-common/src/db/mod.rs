//! Database access for Scout
//!
//! All services share one SQLite database. The schema is created on startup
//! with `CREATE TABLE IF NOT EXISTS`; services can therefore start in any
//! order. Foreign keys are enabled per connection so analysis rows cascade
//! with their project.

pub mod analyses;
pub mod models;
pub mod projects;
pub mod tags;

pub use models::{Analysis, Project, ProjectStatus, Tag};

use crate::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize the database connection pool and schema
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// In-memory pool for tests
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes if they don't exist
async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            path TEXT NOT NULL UNIQUE,
            description TEXT,
            framework TEXT,
            language TEXT,
            package_manager TEXT,
            file_count INTEGER NOT NULL DEFAULT 0,
            lines_of_code INTEGER NOT NULL DEFAULT 0,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            last_modified TEXT,
            status TEXT NOT NULL DEFAULT 'DISCOVERED',
            is_active INTEGER NOT NULL DEFAULT 1,
            discovered_at TEXT NOT NULL,
            analyzed_at TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_analyses (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            summary TEXT NOT NULL,
            tech_stack TEXT NOT NULL,
            complexity TEXT NOT NULL,
            recommendations TEXT NOT NULL,
            completion_score INTEGER NOT NULL,
            maturity_level TEXT NOT NULL,
            production_gaps TEXT NOT NULL,
            estimated_value TEXT NOT NULL,
            model TEXT NOT NULL,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            cache_hit INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            color TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_tags (
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (project_id, tag_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status)",
        "CREATE INDEX IF NOT EXISTS idx_projects_discovered_at ON projects(discovered_at)",
        "CREATE INDEX IF NOT EXISTS idx_projects_status_discovered_at ON projects(status, discovered_at)",
        "CREATE INDEX IF NOT EXISTS idx_projects_framework ON projects(framework)",
        "CREATE INDEX IF NOT EXISTS idx_projects_language ON projects(language)",
        "CREATE INDEX IF NOT EXISTS idx_analyses_project_id ON project_analyses(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_analyses_created_at ON project_analyses(created_at)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}
