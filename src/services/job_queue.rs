//! Job submission interface and its SQLite-backed implementation.
//!
//! The share engine only sees [`JobQueue`]; the worker in
//! [`super::worker`] drains the `jobs` table and runs due work.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::job::{Job, JobKind};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type JobResult<T> = Result<T, JobError>;

/// Accepts named tasks with an optional earliest execution time.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue `kind` for `share_id`. `None` means "as soon as possible".
    async fn enqueue(
        &self,
        kind: JobKind,
        share_id: Uuid,
        run_at: Option<DateTime<Utc>>,
    ) -> JobResult<Uuid>;
}

/// Jobs stored in the service database.
#[derive(Clone)]
pub struct SqliteJobQueue {
    db: Arc<SqlitePool>,
}

/// Attempts before a job is parked as `failed`.
pub const MAX_ATTEMPTS: i64 = 5;

const JOB_COLUMNS: &str =
    "id, kind, share_id, run_at, status, attempts, last_error, created_at";

impl SqliteJobQueue {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Jobs that are due, oldest first.
    pub async fn due(&self, now: DateTime<Utc>, limit: i64) -> JobResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status = 'pending' AND run_at <= ?
             ORDER BY run_at ASC LIMIT ?"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&*self.db)
        .await?;
        Ok(jobs)
    }

    /// Mark a pending job as running. Returns false when another worker got
    /// there first, so each job is run at most once per attempt.
    pub async fn claim(&self, id: Uuid) -> JobResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1
             WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn complete(&self, id: Uuid) -> JobResult<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Record a failure; retry later with a linear backoff or give up.
    pub async fn fail(&self, job: &Job, error: &str) -> JobResult<()> {
        let attempts = job.attempts + 1;
        if attempts >= MAX_ATTEMPTS {
            sqlx::query("UPDATE jobs SET status = 'failed', last_error = ? WHERE id = ?")
                .bind(error)
                .bind(job.id)
                .execute(&*self.db)
                .await?;
        } else {
            let retry_at = Utc::now() + Duration::minutes(attempts);
            sqlx::query(
                "UPDATE jobs SET status = 'pending', last_error = ?, run_at = ? WHERE id = ?",
            )
            .bind(error)
            .bind(retry_at)
            .bind(job.id)
            .execute(&*self.db)
            .await?;
        }
        Ok(())
    }

    /// Jobs that have not completed, including parked failures.
    pub async fn list(&self) -> JobResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY run_at ASC"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(jobs)
    }

    /// Put jobs left `running` by a crashed worker back in the queue.
    pub async fn requeue_stalled(&self) -> JobResult<u64> {
        let result = sqlx::query("UPDATE jobs SET status = 'pending' WHERE status = 'running'")
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        share_id: Uuid,
        run_at: Option<DateTime<Utc>>,
    ) -> JobResult<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO jobs (id, kind, share_id, run_at, status, attempts, created_at)
             VALUES (?, ?, ?, ?, 'pending', 0, ?)",
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(share_id)
        .bind(run_at.unwrap_or(now))
        .bind(now)
        .execute(&*self.db)
        .await?;
        tracing::debug!(job = %id, %kind, share = %share_id, ?run_at, "job enqueued");
        Ok(id)
    }
}
