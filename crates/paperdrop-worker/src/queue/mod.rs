//! Job queue abstraction
//!
//! At-least-once delivery: a job leaves the queue only when a consumer acks it. A claimed
//! job that is neither acked nor nacked before its visibility timeout becomes claimable
//! again, so consumers must be idempotent (see [`crate::completion`]).

mod memory;
mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

use async_trait::async_trait;
use paperdrop_core::models::{
    AckHandle, DeadLetter, Delivery, JobDescriptor, NackOutcome, QueueStats,
};
use paperdrop_core::Config;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Queue is closed")]
    Closed,

    #[error("Queue backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Delivery parameters shared by every queue implementation.
#[derive(Clone, Debug)]
pub struct QueueSettings {
    pub name: String,
    /// How long a claimed job stays hidden before another consumer may claim it.
    pub visibility_timeout: Duration,
    /// Deliveries after which a failing job is dead-lettered.
    pub max_deliveries: u32,
}

impl QueueSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.queue.name.clone(),
            visibility_timeout: config.visibility_timeout(),
            max_deliveries: config.queue.max_deliveries,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: paperdrop_core::constants::DEFAULT_QUEUE_NAME.to_string(),
            visibility_timeout: Duration::from_secs(300),
            max_deliveries: 5,
        }
    }
}

/// Durable job queue.
///
/// Created once per process and shared as `Arc<dyn JobQueue>`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Durably enqueue a job. Idempotent on `job_id`: enqueueing the same descriptor again
    /// is a successful no-op.
    async fn enqueue(&self, job: &JobDescriptor) -> QueueResult<()>;

    /// Claim the next visible job, if any, and hide it for the visibility timeout.
    async fn dequeue(&self) -> QueueResult<Option<Delivery>>;

    /// Acknowledge a delivery. `Ok(false)` when the lease is stale.
    async fn ack(&self, handle: &AckHandle) -> QueueResult<bool>;

    /// Reject a delivery. Permanent failures, and failures on the last allowed delivery,
    /// dead-letter the job; anything else is redelivered after a backoff.
    async fn nack(&self, handle: &AckHandle, error: &str, permanent: bool)
        -> QueueResult<NackOutcome>;

    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>>;

    async fn stats(&self) -> QueueResult<QueueStats>;

    async fn health_check(&self) -> QueueResult<()>;

    /// Stop accepting work and release connections.
    async fn close(&self);

    fn name(&self) -> &str;

    /// Lease length for claimed jobs, when the backend has one.
    fn visibility_timeout(&self) -> Option<Duration> {
        None
    }

    /// Signalled when new jobs may be available, letting idle consumers skip the rest of
    /// their poll interval.
    fn wakeup(&self) -> Option<Arc<Notify>> {
        None
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}
