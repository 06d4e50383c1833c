use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use paperdrop_core::models::JobCompletion;

#[derive(Clone)]
pub struct CompletionRepository {
    pool: PgPool,
}

impl CompletionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self))]
    pub async fn find(&self, job_id: Uuid) -> Result<Option<JobCompletion>> {
        sqlx::query_as::<Postgres, JobCompletion>(
            r#"
            SELECT job_id, completed_at, result
            FROM job_completions
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job completion")
    }

    /// Record that `job_id` finished. The first marker wins; returns `false` if one
    /// already existed.
    #[tracing::instrument(skip(self, result))]
    pub async fn mark_completed(&self, job_id: Uuid, result: &serde_json::Value) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO job_completions (job_id, result)
            VALUES ($1, $2)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(result)
        .execute(&self.pool)
        .await
        .context("Failed to record job completion")?
        .rows_affected()
            == 1;

        Ok(inserted)
    }
}
