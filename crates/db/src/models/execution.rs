use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, Type};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::DbError;

/// How long a claimed-but-not-started row stays invisible to other
/// claimers before it is handed out again.
const CLAIM_STALE_SECS: i64 = 60;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString,
)]
#[sqlx(type_name = "execution_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Timeout
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString,
)]
#[sqlx(type_name = "execution_phase", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionPhase {
    Starting,
    Branching,
    Exploring,
    Installing,
    Implementing,
    Testing,
    Committing,
    Completed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub external_task_id: Option<String>,
    pub prompt: String,
    pub branch: Option<String>,
    pub priority: i64,
    pub status: ExecutionStatus,
    pub phase: ExecutionPhase,
    pub progress: i64,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub pr_url: Option<String>,
    pub commit_sha: Option<String>,
    pub tokens_used: i64,
    pub cost_cents: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "id, tenant_id, project_id, external_task_id, prompt, branch, priority, \
                       status, phase, progress, output, error, duration_ms, pr_url, commit_sha, \
                       tokens_used, cost_cents, created_at, started_at, completed_at";

impl Execution {
    /// A fresh execution in the admission state: `(queued, starting, 0%)`.
    pub fn new(
        tenant_id: Uuid,
        project_id: Uuid,
        prompt: String,
        branch: Option<String>,
        external_task_id: Option<String>,
        priority: i64,
    ) -> Self {
        Execution {
            id: Uuid::new_v4(),
            tenant_id,
            project_id,
            external_task_id,
            prompt,
            branch,
            priority,
            status: ExecutionStatus::Queued,
            phase: ExecutionPhase::Starting,
            progress: 0,
            output: None,
            error: None,
            duration_ms: 0,
            pr_url: None,
            commit_sha: None,
            tokens_used: 0,
            cost_cents: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Insert a new row. An ID collision surfaces as `Conflict`.
    pub async fn create(pool: &SqlitePool, exec: &Execution) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"INSERT INTO executions (
                   id, tenant_id, project_id, external_task_id, prompt, branch, priority,
                   status, phase, progress, output, error, duration_ms, pr_url, commit_sha,
                   tokens_used, cost_cents, created_at, started_at, completed_at
               )
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                       ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"#,
        )
        .bind(exec.id)
        .bind(exec.tenant_id)
        .bind(exec.project_id)
        .bind(&exec.external_task_id)
        .bind(&exec.prompt)
        .bind(&exec.branch)
        .bind(exec.priority)
        .bind(exec.status)
        .bind(exec.phase)
        .bind(exec.progress)
        .bind(&exec.output)
        .bind(&exec.error)
        .bind(exec.duration_ms)
        .bind(&exec.pr_url)
        .bind(&exec.commit_sha)
        .bind(exec.tokens_used)
        .bind(exec.cost_cents)
        .bind(exec.created_at)
        .bind(exec.started_at)
        .bind(exec.completed_at)
        .execute(pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(DbError::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, DbError> {
        let row = sqlx::query_as::<_, Execution>(&format!(
            "SELECT {COLUMNS} FROM executions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn list_by_tenant(
        pool: &SqlitePool,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, DbError> {
        let rows = sqlx::query_as::<_, Execution>(&format!(
            "SELECT {COLUMNS} FROM executions
              WHERE tenant_id = ?1
              ORDER BY created_at DESC
              LIMIT ?2 OFFSET ?3"
        ))
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_by_project(
        pool: &SqlitePool,
        project_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, DbError> {
        let rows = sqlx::query_as::<_, Execution>(&format!(
            "SELECT {COLUMNS} FROM executions
              WHERE project_id = ?1
              ORDER BY created_at DESC
              LIMIT ?2 OFFSET ?3"
        ))
        .bind(project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Update all mutable fields.
    ///
    /// Transitions are monotonic: terminal rows are frozen, and a `running`
    /// row can never move back to `pending`/`queued`. A refused write on an
    /// existing row is a `Conflict`; a missing row is `NotFound`.
    pub async fn update(pool: &SqlitePool, exec: &Execution) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"UPDATE executions
                  SET status = ?2, phase = ?3, progress = ?4, output = ?5, error = ?6,
                      duration_ms = ?7, pr_url = ?8, commit_sha = ?9, tokens_used = ?10,
                      cost_cents = ?11, started_at = ?12, completed_at = ?13,
                      claimed_at = NULL
                WHERE id = ?1
                  AND status IN ('pending', 'queued', 'running')
                  AND NOT (status = 'running' AND ?2 IN ('pending', 'queued'))"#,
        )
        .bind(exec.id)
        .bind(exec.status)
        .bind(exec.phase)
        .bind(exec.progress)
        .bind(&exec.output)
        .bind(&exec.error)
        .bind(exec.duration_ms)
        .bind(&exec.pr_url)
        .bind(&exec.commit_sha)
        .bind(exec.tokens_used)
        .bind(exec.cost_cents)
        .bind(exec.started_at)
        .bind(exec.completed_at)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        match Self::find_by_id(pool, exec.id).await? {
            Some(_) => Err(DbError::Conflict),
            None => Err(DbError::NotFound),
        }
    }

    /// Atomically claim up to `limit` queued rows, oldest first.
    ///
    /// Claimed rows stay in `queued`; the caller finalises by updating each
    /// to `running`. The claim marker keeps concurrent callers from being
    /// handed the same row, and goes stale after a minute so an abandoned
    /// claim is reclaimed.
    pub async fn claim_queued(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, DbError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let stale = now - Duration::seconds(CLAIM_STALE_SECS);
        let mut rows = sqlx::query_as::<_, Execution>(&format!(
            r#"UPDATE executions
                  SET claimed_at = ?1
                WHERE id IN (
                    SELECT id FROM executions
                     WHERE status = 'queued'
                       AND (claimed_at IS NULL OR claimed_at < ?2)
                     ORDER BY created_at ASC
                     LIMIT ?3)
               RETURNING {COLUMNS}"#
        ))
        .bind(now)
        .bind(stale)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        rows.sort_by_key(|e| e.created_at);
        if !rows.is_empty() {
            tracing::debug!("claimed {} queued execution(s)", rows.len());
        }
        Ok(rows)
    }

    pub async fn list_by_status(
        pool: &SqlitePool,
        status: ExecutionStatus,
    ) -> Result<Vec<Self>, DbError> {
        let rows = sqlx::query_as::<_, Execution>(&format!(
            "SELECT {COLUMNS} FROM executions WHERE status = ?1 ORDER BY created_at ASC"
        ))
        .bind(status)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_by_status(
        pool: &SqlitePool,
        status: ExecutionStatus,
    ) -> Result<i64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM executions WHERE status = ?1")
                .bind(status)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }
}
