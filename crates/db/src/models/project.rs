use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::DbError;

/// Read-only from the engine's point of view: the repo to clone and how to
/// wrap the prompt.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub repo_url: String,
    pub default_branch: String,
    pub navigator_enabled: bool,
    pub setup_script: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, DbError> {
        let row = sqlx::query_as::<_, Project>(
            r#"SELECT id, tenant_id, name, repo_url, default_branch, navigator_enabled,
                      setup_script, created_at
                 FROM projects
                WHERE id = ?1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn create(pool: &SqlitePool, project: &Project) -> Result<(), DbError> {
        sqlx::query(
            r#"INSERT INTO projects (
                   id, tenant_id, name, repo_url, default_branch, navigator_enabled,
                   setup_script, created_at
               )
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        )
        .bind(project.id)
        .bind(project.tenant_id)
        .bind(&project.name)
        .bind(&project.repo_url)
        .bind(&project.default_branch)
        .bind(project.navigator_enabled)
        .bind(&project.setup_script)
        .bind(project.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}
