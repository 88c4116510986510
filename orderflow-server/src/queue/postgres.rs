//! Durable Postgres-backed job queue
//!
//! Jobs are rows; claiming uses `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never double-claim a row that is being handed out. A worker
//! crash mid-task leaves the row `running`; once its lease lapses the row
//! is claimable again, so delivery stays at-least-once across crashes and
//! the task bodies' idempotency absorbs the replay. Completed and dead
//! rows are kept as an audit trail.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{Result, WorkflowError};
use crate::queue::{Job, JobQueue, RetryPolicy, Task};

pub struct PgQueue {
    pool: PgPool,
    policy: RetryPolicy,
}

impl PgQueue {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }
}

#[async_trait]
impl JobQueue for PgQueue {
    async fn enqueue(&self, task: &Task) -> Result<i64> {
        let payload = serde_json::to_value(task).map_err(WorkflowError::store)?;
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO jobs (task, status, max_attempts) VALUES ($1, 'pending', $2) RETURNING id",
        )
        .bind(payload)
        .bind(self.policy.max_attempts)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(job_id = id, kind = task.kind(), "Task enqueued");
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<Job>> {
        // Stale running rows are orphans from crashed workers; reclaiming
        // them counts another delivery attempt against the same budget.
        let row: Option<(i64, serde_json::Value, i32, i32)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'running', attempts = attempts + 1, updated_at = now()
            WHERE id = (
                SELECT id FROM jobs
                WHERE (status = 'pending' AND run_at <= now())
                   OR (status = 'running'
                       AND updated_at < now() - make_interval(secs => $1))
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, task, attempts, max_attempts
            "#,
        )
        .bind(crate::queue::JOB_LEASE.as_secs() as f64)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, payload, attempts, max_attempts)) = row else {
            return Ok(None);
        };

        let task: Task = serde_json::from_value(payload).map_err(WorkflowError::store)?;
        Ok(Some(Job {
            id,
            task,
            attempts,
            max_attempts,
        }))
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'completed', updated_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str, permanent: bool) -> Result<()> {
        if permanent || job.attempts >= job.max_attempts {
            sqlx::query(
                "UPDATE jobs SET status = 'dead', last_error = $2, updated_at = now() WHERE id = $1",
            )
            .bind(job.id)
            .bind(error)
            .execute(&self.pool)
            .await?;
            tracing::error!(
                job_id = job.id,
                kind = job.task.kind(),
                attempts = job.attempts,
                permanent,
                error,
                "Task dead-lettered"
            );
            return Ok(());
        }

        let delay_secs = self.policy.backoff(job.attempts).as_secs() as i64;
        sqlx::query(
            "UPDATE jobs SET status = 'pending', last_error = $2, \
             run_at = now() + make_interval(secs => $3::double precision), updated_at = now() \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(error)
        .bind(delay_secs as f64)
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            job_id = job.id,
            kind = job.task.kind(),
            attempts = job.attempts,
            retry_in_secs = delay_secs,
            error,
            "Task failed, retry scheduled"
        );
        Ok(())
    }
}
