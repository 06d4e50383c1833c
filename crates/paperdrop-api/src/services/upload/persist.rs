//! Persist-then-enqueue
//!
//! The blob is committed before the job is offered to the queue, so every enqueued
//! descriptor references a readable blob. An enqueue that cannot be confirmed is retried
//! with the same `job_id` and, when attempts run out, written to the orphan ledger.

use bytes::Bytes;
use chrono::Utc;
use paperdrop_core::models::{BlobId, JobDescriptor, UploadAccepted, UploadedFile};
use paperdrop_core::{Config, DocumentPolicy};
use paperdrop_storage::{blob_key, BlobStore};
use paperdrop_worker::{JobQueue, OrphanLedger};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::UploadError;

const MAX_ENQUEUE_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct EnqueueRetry {
    /// Bound on a single enqueue call.
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub base_backoff: Duration,
}

impl EnqueueRetry {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.enqueue_timeout(),
            max_attempts: config.queue.enqueue_max_attempts.max(1),
            base_backoff: Duration::from_millis(config.queue.enqueue_backoff_ms),
        }
    }

    /// Backoff after failed attempt number `attempt` (1-based), with up to 50% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
            .min(MAX_ENQUEUE_BACKOFF);
        let jitter_ms = (exp.as_millis() as u64) / 2;
        if jitter_ms == 0 {
            return exp;
        }
        let jitter = rand::rng().random_range(0..=jitter_ms);
        (exp + Duration::from_millis(jitter)).min(MAX_ENQUEUE_BACKOFF)
    }
}

/// Shared handles for the persist phase. Cheap to clone into a spawned task.
#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    ledger: Arc<dyn OrphanLedger>,
    retry: EnqueueRetry,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn BlobStore>,
        queue: Arc<dyn JobQueue>,
        ledger: Arc<dyn OrphanLedger>,
        retry: EnqueueRetry,
    ) -> Self {
        Self {
            store,
            queue,
            ledger,
            retry,
        }
    }

    /// Run [`Self::persist_and_enqueue`] on its own task and wait for it.
    ///
    /// If the request future is dropped (client gone) the task still runs to the end, so a
    /// stored blob is never left without either a job or an orphan record.
    pub async fn run_detached(
        &self,
        policy: DocumentPolicy,
        file: UploadedFile,
    ) -> Result<UploadAccepted, UploadError> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.persist_and_enqueue(&policy, file).await })
            .await
            .map_err(|e| UploadError::Aborted(e.to_string()))?
    }

    #[tracing::instrument(
        skip(self, policy, file),
        fields(
            doc_type = %policy.doc_type,
            size_bytes = file.size_bytes(),
            blob_id = tracing::field::Empty,
            job_id = tracing::field::Empty
        )
    )]
    pub async fn persist_and_enqueue(
        &self,
        policy: &DocumentPolicy,
        file: UploadedFile,
    ) -> Result<UploadAccepted, UploadError> {
        let started = Instant::now();
        let blob_id = BlobId::generate();
        let storage_key = blob_key(&policy.doc_type, blob_id, &policy.extension, Utc::now());
        tracing::Span::current().record("blob_id", tracing::field::display(blob_id));

        let UploadedFile {
            original_name,
            media_type,
            content,
        } = file;

        let blob = self
            .store
            .write(blob_id, &storage_key, Bytes::from(content))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, storage_key = %storage_key, "Blob write failed, nothing enqueued");
                e
            })?;

        let job = JobDescriptor::for_blob(&blob, &policy.doc_type, &original_name, &media_type);
        tracing::Span::current().record("job_id", tracing::field::display(job.job_id));

        self.enqueue_with_retry(&job).await?;

        tracing::info!(
            storage_key = %blob.storage_key,
            duration_ms = started.elapsed().as_millis() as u64,
            "Upload accepted"
        );
        Ok(UploadAccepted::new(job.job_id, blob.blob_id))
    }

    async fn enqueue_with_retry(&self, job: &JobDescriptor) -> Result<(), UploadError> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            match tokio::time::timeout(self.retry.timeout, self.queue.enqueue(job)).await {
                Ok(Ok(())) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Enqueue succeeded after retry");
                    }
                    return Ok(());
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "enqueue timed out after {}ms",
                        self.retry.timeout.as_millis()
                    )
                }
            }

            tracing::warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                error = %last_error,
                "Enqueue attempt failed"
            );
            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }

        if let Err(e) = self.ledger.record(job, &last_error).await {
            tracing::error!(
                error = %e,
                descriptor = %descriptor_for_log(job),
                "Failed to record orphaned blob; descriptor logged for manual recovery"
            );
        }

        Err(UploadError::EnqueueFailed {
            job_id: job.job_id,
            attempts: self.retry.max_attempts,
            reason: last_error,
        })
    }
}

/// The descriptor as JSON, or its `Debug` form if encoding fails. Never empty.
fn descriptor_for_log(job: &JobDescriptor) -> String {
    serde_json::to_string(job).unwrap_or_else(|_| format!("{:?}", job))
}
