//! Durable job queue records

use super::{append_event, timestamp, MetaDb};
use crate::error::{Error, ErrorKind, Result};
use crate::jobs::{JobKind, JobStatus};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

/// A pipeline stage execution
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub repository_id: String,
    pub kind: String,
    pub status: String,
    pub generation: i64,
    pub force: bool,
    pub progress: i64,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub run_after: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Job {
    pub fn new(
        repository_id: String,
        kind: JobKind,
        generation: i64,
        force: bool,
        max_attempts: u32,
    ) -> Self {
        let now = timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            repository_id,
            kind: kind.to_string(),
            status: JobStatus::Pending.to_string(),
            generation,
            force,
            progress: 0,
            attempt_count: 0,
            max_attempts: max_attempts as i64,
            error_kind: None,
            error_message: None,
            run_after: now.clone(),
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn get_kind(&self) -> Result<JobKind> {
        self.kind.parse()
    }

    pub fn get_status(&self) -> Result<JobStatus> {
        self.status.parse()
    }

    pub fn get_error_kind(&self) -> Option<ErrorKind> {
        self.error_kind.as_deref().and_then(|k| k.parse().ok())
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

/// Insert a pending job; a live job of the same kind is a `Conflict`
pub async fn insert_job(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO jobs (id, repository_id, kind, status, generation, force, progress, attempt_count, max_attempts, run_after, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.id)
    .bind(&job.repository_id)
    .bind(&job.kind)
    .bind(&job.status)
    .bind(job.generation)
    .bind(job.force)
    .bind(job.progress)
    .bind(job.attempt_count)
    .bind(job.max_attempts)
    .bind(&job.run_after)
    .bind(&job.created_at)
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => {}
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(Error::Conflict(format!(
                "A {} job is already pending or running for repository {}",
                job.kind, job.repository_id
            )));
        }
        Err(e) => return Err(e.into()),
    }

    append_event(
        conn,
        &job.repository_id,
        Some(&job.id),
        "job_submitted",
        None,
        Some(&job.kind),
    )
    .await
}

/// Load a job inside a transaction
pub async fn fetch_job(conn: &mut SqliteConnection, id: &str) -> Result<Job> {
    sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::JobNotFound(id.to_string()))
}

/// Non-terminal jobs of a repository
pub async fn active_jobs(conn: &mut SqliteConnection, repository_id: &str) -> Result<Vec<Job>> {
    let jobs = sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs WHERE repository_id = ? AND status IN ('pending', 'running') ORDER BY created_at",
    )
    .bind(repository_id)
    .fetch_all(conn)
    .await?;
    Ok(jobs)
}

/// Mark a running job succeeded; false if it is no longer running
pub async fn mark_job_succeeded(conn: &mut SqliteConnection, job: &Job) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = 'succeeded', progress = 100, finished_at = ?,
            error_kind = NULL, error_message = NULL
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(timestamp())
    .bind(&job.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    append_event(
        conn,
        &job.repository_id,
        Some(&job.id),
        "job_succeeded",
        None,
        Some(&job.kind),
    )
    .await?;
    Ok(true)
}

/// Mark a non-terminal job failed; false if it already finished
pub async fn mark_job_failed(
    conn: &mut SqliteConnection,
    job: &Job,
    kind: ErrorKind,
    message: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = 'failed', finished_at = ?, error_kind = ?, error_message = ?
        WHERE id = ? AND status IN ('pending', 'running')
        "#,
    )
    .bind(timestamp())
    .bind(kind.as_str())
    .bind(message)
    .bind(&job.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    append_event(
        conn,
        &job.repository_id,
        Some(&job.id),
        "job_failed",
        None,
        Some(&format!("{}: {}", kind, message)),
    )
    .await?;
    Ok(true)
}

/// Put a running job back in the queue until `run_after`
pub async fn requeue_job(
    conn: &mut SqliteConnection,
    job: &Job,
    run_after: &str,
    kind: ErrorKind,
    message: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = 'pending', run_after = ?, started_at = NULL,
            error_kind = ?, error_message = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(run_after)
    .bind(kind.as_str())
    .bind(message)
    .bind(&job.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    append_event(
        conn,
        &job.repository_id,
        Some(&job.id),
        "job_retry_scheduled",
        None,
        Some(&format!(
            "attempt {} of {} failed ({}: {}); retry after {}",
            job.attempt_count, job.max_attempts, kind, message, run_after
        )),
    )
    .await?;
    Ok(true)
}

impl MetaDb {
    // ===== Job Operations =====

    /// Get job by ID
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(job)
    }

    /// Get job by ID or fail with `JobNotFound`
    pub async fn require_job(&self, id: &str) -> Result<Job> {
        self.get_job(id)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    /// Jobs of a repository, newest first
    pub async fn list_jobs(&self, repository_id: &str) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE repository_id = ? ORDER BY created_at DESC",
        )
        .bind(repository_id)
        .fetch_all(self.pool())
        .await?;
        Ok(jobs)
    }

    /// Most recent job of each kind for a repository
    pub async fn latest_jobs(&self, repository_id: &str) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT j.* FROM jobs j
            WHERE j.repository_id = ?
              AND j.created_at = (
                  SELECT MAX(created_at) FROM jobs
                  WHERE repository_id = j.repository_id AND kind = j.kind
              )
            ORDER BY j.created_at
            "#,
        )
        .bind(repository_id)
        .fetch_all(self.pool())
        .await?;
        Ok(jobs)
    }

    /// Claim the oldest runnable pending job
    ///
    /// The claim is a single conditional update, so two workers can never
    /// both move the same job to running.
    pub async fn claim_next_job(&self) -> Result<Option<Job>> {
        let now = timestamp();
        let mut tx = self.begin().await?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET status = 'running', attempt_count = attempt_count + 1, started_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND run_after <= ?
                ORDER BY run_after, created_at
                LIMIT 1
            ) AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(&now)
        .bind(&now)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(job) = &job {
            append_event(
                &mut tx,
                &job.repository_id,
                Some(&job.id),
                "job_started",
                None,
                Some(&format!("{} attempt {}", job.kind, job.attempt_count)),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    /// Raise a running job's progress; never lowers it
    pub async fn update_job_progress(&self, job_id: &str, progress: u8) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET progress = MAX(progress, ?) WHERE id = ? AND status = 'running'",
        )
        .bind(progress.min(100) as i64)
        .bind(job_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All running jobs
    pub async fn running_jobs(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE status = 'running'")
            .fetch_all(self.pool())
            .await?;
        Ok(jobs)
    }

    /// Number of non-terminal jobs across all repositories
    pub async fn count_active_jobs(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('pending', 'running')",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(count as usize)
    }

    /// Earliest `run_after` among pending jobs
    pub async fn next_pending_run_after(&self) -> Result<Option<String>> {
        let next: Option<String> =
            sqlx::query_scalar("SELECT MIN(run_after) FROM jobs WHERE status = 'pending'")
                .fetch_one(self.pool())
                .await?;
        Ok(next)
    }
}
