use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

use super::blob::{BlobId, StoredBlob};
use crate::constants::MAX_REDELIVERY_BACKOFF_SECS;

/// Message placed on the job queue for one accepted upload.
///
/// Carries everything a worker needs to locate and verify the blob. Never mutated after
/// creation: every redelivery, and every producer-side retry, carries the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobDescriptor {
    /// Generated once per accepted upload; enqueue is idempotent on this id.
    pub job_id: Uuid,
    pub blob_id: BlobId,
    pub doc_type: String,
    /// Display name supplied by the client. Not a path.
    pub original_name: String,
    /// Key of the blob inside the blob store.
    pub storage_path: String,
    pub media_type: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub enqueued_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn for_blob(
        blob: &StoredBlob,
        doc_type: impl Into<String>,
        original_name: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            blob_id: blob.blob_id,
            doc_type: doc_type.into(),
            original_name: original_name.into(),
            storage_path: blob.storage_key.clone(),
            media_type: media_type.into(),
            size_bytes: blob.size_bytes,
            sha256: blob.sha256.clone(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Delivery state of a job, owned by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "job_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InFlight,
    Acked,
    DeadLettered,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InFlight => write!(f, "in_flight"),
            JobStatus::Acked => write!(f, "acked"),
            JobStatus::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// Proof of a claim on a delivered job.
///
/// `lease_id` changes on every claim. Acking or nacking with a lease that is no longer
/// current (the visibility window expired and someone else claimed the job) has no effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckHandle {
    pub job_id: Uuid,
    pub lease_id: Uuid,
    /// 1 for the first delivery.
    pub attempt: u32,
}

/// A job handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub descriptor: JobDescriptor,
    pub handle: AckHandle,
}

/// What the queue did with a negatively acknowledged job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued { visible_at: DateTime<Utc> },
    DeadLettered,
    /// The lease was stale; the job belongs to a newer claim.
    StaleLease,
}

/// A job that exhausted its deliveries or failed permanently.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeadLetter {
    pub descriptor: JobDescriptor,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Number of jobs in each delivery state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub acked: u64,
    pub dead_lettered: u64,
}

/// Durable record that a job's processing finished. Checked before every dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct JobCompletion {
    pub job_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub result: serde_json::Value,
}

/// Delay before a nacked job becomes visible again: `2^attempts` seconds, capped at five
/// minutes.
pub fn redelivery_delay(attempts: u32) -> std::time::Duration {
    let secs = 2u64
        .checked_pow(attempts)
        .unwrap_or(u64::MAX)
        .min(MAX_REDELIVERY_BACKOFF_SECS);
    std::time::Duration::from_secs(secs)
}
