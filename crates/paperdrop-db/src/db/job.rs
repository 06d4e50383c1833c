use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use paperdrop_core::models::{
    redelivery_delay, DeadLetter, JobDescriptor, JobStatus, NackOutcome, QueueStats,
};

/// Channel notified on every new job so idle workers can wake before their next poll.
pub const NEW_JOB_CHANNEL: &str = "paperdrop_new_job";

/// One row of the `jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub payload: Json<JobDescriptor>,
    pub status: JobStatus,
    pub attempts: i32,
    pub lease_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl JobRow {
    pub fn attempts(&self) -> u32 {
        self.attempts.max(0) as u32
    }
}

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a job unless one with the same id already exists.
    ///
    /// Returns `true` when a row was inserted, `false` for a duplicate. Both mean the job is
    /// durably on the queue.
    #[tracing::instrument(
        skip(self, descriptor),
        fields(job_id = %descriptor.job_id, blob_id = %descriptor.blob_id)
    )]
    pub async fn insert_job(&self, queue_name: &str, descriptor: &JobDescriptor) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for enqueue")?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, queue_name, blob_id, payload, status, visible_at)
            VALUES ($1, $2, $3, $4, 'pending', NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(descriptor.job_id)
        .bind(queue_name)
        .bind(descriptor.blob_id.as_uuid())
        .bind(Json(descriptor))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to insert job into database");
            anyhow::anyhow!("Failed to insert job into database: {}", e)
        })?;

        let inserted = result.rows_affected() == 1;

        // Workers fall back to polling if the notification is lost.
        if inserted {
            if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
                .bind(NEW_JOB_CHANNEL)
                .bind(queue_name)
                .execute(&mut *tx)
                .await
            {
                tracing::warn!(error = %e, "Failed to send pg_notify for new job");
            }
        }

        tx.commit()
            .await
            .context("Failed to commit enqueue transaction")?;

        if inserted {
            tracing::info!(queue = %queue_name, "Job enqueued");
        } else {
            tracing::debug!(queue = %queue_name, "Job already enqueued, insert skipped");
        }

        Ok(inserted)
    }

    /// Atomically claim the oldest visible job.
    ///
    /// Candidates are pending jobs whose `visible_at` has passed and in-flight jobs whose
    /// visibility window expired. A candidate that already used `max_deliveries` attempts is
    /// dead-lettered instead of delivered. Uses `FOR UPDATE SKIP LOCKED` so concurrent
    /// workers never claim the same row.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
        max_deliveries: u32,
    ) -> Result<Option<JobRow>> {
        loop {
            let mut tx = self
                .pool
                .begin()
                .await
                .context("Failed to begin transaction")?;

            let candidate: Option<(Uuid, i32)> = sqlx::query_as(
                r#"
                SELECT id, attempts
                FROM jobs
                WHERE queue_name = $1
                    AND status IN ('pending', 'in_flight')
                    AND visible_at <= NOW()
                ORDER BY visible_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
                "#,
            )
            .bind(queue_name)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to fetch next job")?;

            let Some((job_id, attempts)) = candidate else {
                tx.commit().await.context("Failed to commit transaction")?;
                return Ok(None);
            };

            if attempts.max(0) as u32 >= max_deliveries {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'dead_lettered',
                        lease_id = NULL,
                        last_error = COALESCE(last_error, 'visibility timeout expired on final delivery'),
                        dead_lettered_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await
                .context("Failed to dead-letter exhausted job")?;
                tx.commit().await.context("Failed to commit transaction")?;

                tracing::warn!(
                    job_id = %job_id,
                    attempts,
                    "Job exhausted its deliveries without an ack, dead-lettered"
                );
                continue;
            }

            let row: JobRow = sqlx::query_as::<Postgres, JobRow>(
                r#"
                UPDATE jobs
                SET status = 'in_flight',
                    attempts = attempts + 1,
                    lease_id = $2,
                    visible_at = NOW() + make_interval(secs => $3),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING id, payload, status, attempts, lease_id, last_error, dead_lettered_at
                "#,
            )
            .bind(job_id)
            .bind(Uuid::new_v4())
            .bind(visibility_timeout.as_secs_f64())
            .fetch_one(&mut *tx)
            .await
            .context("Failed to update job status")?;

            tx.commit().await.context("Failed to commit transaction")?;

            tracing::debug!(job_id = %row.id, attempt = row.attempts, "Job claimed");
            return Ok(Some(row));
        }
    }

    /// Mark an in-flight job acknowledged. Returns `false` if `lease_id` is no longer the
    /// current lease.
    #[tracing::instrument(skip(self))]
    pub async fn ack(&self, job_id: Uuid, lease_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'acked',
                lease_id = NULL,
                acked_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND lease_id = $2 AND status = 'in_flight'
            "#,
        )
        .bind(job_id)
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .context("Failed to ack job")?;

        Ok(result.rows_affected() == 1)
    }

    /// Return an in-flight job to the queue or dead-letter it.
    #[tracing::instrument(skip(self, error))]
    pub async fn nack(
        &self,
        job_id: Uuid,
        lease_id: Uuid,
        error: &str,
        permanent: bool,
        max_deliveries: u32,
    ) -> Result<NackOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT attempts FROM jobs
            WHERE id = $1 AND lease_id = $2 AND status = 'in_flight'
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(lease_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load job for nack")?;

        let Some(attempts) = attempts else {
            tx.commit().await.context("Failed to commit transaction")?;
            return Ok(NackOutcome::StaleLease);
        };
        let attempts = attempts.max(0) as u32;

        let outcome = if permanent || attempts >= max_deliveries {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead_lettered',
                    lease_id = NULL,
                    last_error = $2,
                    dead_lettered_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(error)
            .execute(&mut *tx)
            .await
            .context("Failed to dead-letter job")?;
            NackOutcome::DeadLettered
        } else {
            let delay = redelivery_delay(attempts);
            let visible_at: DateTime<Utc> = sqlx::query_scalar(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    lease_id = NULL,
                    last_error = $2,
                    visible_at = NOW() + make_interval(secs => $3),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING visible_at
                "#,
            )
            .bind(job_id)
            .bind(error)
            .bind(delay.as_secs_f64())
            .fetch_one(&mut *tx)
            .await
            .context("Failed to requeue job")?;
            NackOutcome::Requeued { visible_at }
        };

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(outcome)
    }

    /// Most recently dead-lettered jobs first.
    #[tracing::instrument(skip(self))]
    pub async fn dead_letters(&self, queue_name: &str, limit: i64) -> Result<Vec<DeadLetter>> {
        let rows: Vec<JobRow> = sqlx::query_as::<Postgres, JobRow>(
            r#"
            SELECT id, payload, status, attempts, lease_id, last_error, dead_lettered_at
            FROM jobs
            WHERE queue_name = $1 AND status = 'dead_lettered'
            ORDER BY dead_lettered_at DESC
            LIMIT $2
            "#,
        )
        .bind(queue_name)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list dead-lettered jobs")?;

        Ok(rows
            .into_iter()
            .map(|row| DeadLetter {
                attempts: row.attempts(),
                dead_lettered_at: row.dead_lettered_at.unwrap_or_else(Utc::now),
                last_error: row.last_error,
                descriptor: row.payload.0,
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    pub async fn stats(&self, queue_name: &str) -> Result<QueueStats> {
        let counts: Vec<(JobStatus, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM jobs
            WHERE queue_name = $1
            GROUP BY status
            "#,
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch job stats")?;

        let mut stats = QueueStats::default();
        for (status, count) in counts {
            let count = count.max(0) as u64;
            match status {
                JobStatus::Pending => stats.pending = count,
                JobStatus::InFlight => stats.in_flight = count,
                JobStatus::Acked => stats.acked = count,
                JobStatus::DeadLettered => stats.dead_lettered = count,
            }
        }
        Ok(stats)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRow>> {
        sqlx::query_as::<Postgres, JobRow>(
            r#"
            SELECT id, payload, status, attempts, lease_id, last_error, dead_lettered_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job")
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
