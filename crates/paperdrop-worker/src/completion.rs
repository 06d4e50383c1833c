//! Completion markers
//!
//! Redelivery is expected (expired leases, acks lost to a crash). The worker pool records a
//! marker before acking and checks it before dispatching, so a job whose marker exists is
//! acked again without running its handler a second time.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use paperdrop_core::models::JobCompletion;
use paperdrop_db::CompletionRepository;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait CompletionStore: Send + Sync {
    async fn get(&self, job_id: Uuid) -> Result<Option<JobCompletion>>;

    /// Record completion. A second marker for the same job is ignored.
    async fn mark_completed(&self, job_id: Uuid, result: &serde_json::Value) -> Result<()>;

    async fn is_completed(&self, job_id: Uuid) -> Result<bool> {
        Ok(self.get(job_id).await?.is_some())
    }
}

/// Markers in the `job_completions` table.
pub struct PgCompletionStore {
    repository: CompletionRepository,
}

impl PgCompletionStore {
    pub fn new(repository: CompletionRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl CompletionStore for PgCompletionStore {
    async fn get(&self, job_id: Uuid) -> Result<Option<JobCompletion>> {
        self.repository.find(job_id).await
    }

    async fn mark_completed(&self, job_id: Uuid, result: &serde_json::Value) -> Result<()> {
        if !self.repository.mark_completed(job_id, result).await? {
            tracing::debug!(job_id = %job_id, "Completion marker already present");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCompletionStore {
    markers: Mutex<HashMap<Uuid, JobCompletion>>,
}

impl MemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.markers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CompletionStore for MemoryCompletionStore {
    async fn get(&self, job_id: Uuid) -> Result<Option<JobCompletion>> {
        Ok(self.markers.lock().await.get(&job_id).cloned())
    }

    async fn mark_completed(&self, job_id: Uuid, result: &serde_json::Value) -> Result<()> {
        self.markers
            .lock()
            .await
            .entry(job_id)
            .or_insert_with(|| JobCompletion {
                job_id,
                completed_at: Utc::now(),
                result: result.clone(),
            });
        Ok(())
    }
}
