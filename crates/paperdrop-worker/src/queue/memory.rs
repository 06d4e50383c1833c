use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paperdrop_core::models::{
    redelivery_delay, AckHandle, DeadLetter, Delivery, JobDescriptor, JobStatus, NackOutcome,
    QueueStats,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use super::{to_chrono, JobQueue, QueueError, QueueResult, QueueSettings};

struct Entry {
    descriptor: JobDescriptor,
    status: JobStatus,
    attempts: u32,
    visible_at: DateTime<Utc>,
    lease_id: Option<Uuid>,
    last_error: Option<String>,
    dead_lettered_at: Option<DateTime<Utc>>,
    /// Insertion order, breaks ties between equal `visible_at`.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Entry>,
    next_seq: u64,
}

/// In-process queue with the same delivery semantics as [`super::PgJobQueue`].
///
/// State lives only as long as the process. Used for development and tests.
pub struct MemoryJobQueue {
    settings: QueueSettings,
    inner: Mutex<Inner>,
    notify: Arc<Notify>,
    closed: AtomicBool,
}

impl MemoryJobQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner::default()),
            notify: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Number of distinct jobs ever enqueued, in any state.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current state of a job, for assertions in tests and diagnostics.
    pub async fn status(&self, job_id: Uuid) -> Option<(JobStatus, u32)> {
        self.inner
            .lock()
            .await
            .jobs
            .get(&job_id)
            .map(|e| (e.status, e.attempts))
    }

    /// Snapshot of every enqueued descriptor in insertion order.
    pub async fn descriptors(&self) -> Vec<JobDescriptor> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<&Entry> = inner.jobs.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.descriptor.clone()).collect()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &JobDescriptor) -> QueueResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;

        if inner.jobs.contains_key(&job.job_id) {
            tracing::debug!(job_id = %job.job_id, "Job already enqueued, insert skipped");
            return Ok(());
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.job_id,
            Entry {
                descriptor: job.clone(),
                status: JobStatus::Pending,
                attempts: 0,
                visible_at: Utc::now(),
                lease_id: None,
                last_error: None,
                dead_lettered_at: None,
                seq,
            },
        );
        drop(inner);

        tracing::info!(
            job_id = %job.job_id,
            blob_id = %job.blob_id,
            queue = %self.settings.name,
            "Job enqueued"
        );
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<Delivery>> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        loop {
            let candidate = inner
                .jobs
                .values()
                .filter(|e| {
                    matches!(e.status, JobStatus::Pending | JobStatus::InFlight)
                        && e.visible_at <= now
                })
                .min_by_key(|e| (e.visible_at, e.seq))
                .map(|e| e.descriptor.job_id);

            let Some(job_id) = candidate else {
                return Ok(None);
            };
            let Some(entry) = inner.jobs.get_mut(&job_id) else {
                return Ok(None);
            };

            if entry.attempts >= self.settings.max_deliveries {
                entry.status = JobStatus::DeadLettered;
                entry.lease_id = None;
                entry.dead_lettered_at = Some(now);
                entry.last_error.get_or_insert_with(|| {
                    "visibility timeout expired on final delivery".to_string()
                });
                tracing::warn!(
                    job_id = %job_id,
                    attempts = entry.attempts,
                    "Job exhausted its deliveries without an ack, dead-lettered"
                );
                continue;
            }

            let lease_id = Uuid::new_v4();
            entry.status = JobStatus::InFlight;
            entry.attempts += 1;
            entry.lease_id = Some(lease_id);
            entry.visible_at = now + to_chrono(self.settings.visibility_timeout);

            return Ok(Some(Delivery {
                descriptor: entry.descriptor.clone(),
                handle: AckHandle {
                    job_id,
                    lease_id,
                    attempt: entry.attempts,
                },
            }));
        }
    }

    async fn ack(&self, handle: &AckHandle) -> QueueResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&handle.job_id) {
            Some(entry)
                if entry.status == JobStatus::InFlight
                    && entry.lease_id == Some(handle.lease_id) =>
            {
                entry.status = JobStatus::Acked;
                entry.lease_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn nack(
        &self,
        handle: &AckHandle,
        error: &str,
        permanent: bool,
    ) -> QueueResult<NackOutcome> {
        let mut inner = self.inner.lock().await;
        let entry = match inner.jobs.get_mut(&handle.job_id) {
            Some(entry)
                if entry.status == JobStatus::InFlight
                    && entry.lease_id == Some(handle.lease_id) =>
            {
                entry
            }
            _ => return Ok(NackOutcome::StaleLease),
        };

        let now = Utc::now();
        entry.lease_id = None;
        entry.last_error = Some(error.to_string());

        if permanent || entry.attempts >= self.settings.max_deliveries {
            entry.status = JobStatus::DeadLettered;
            entry.dead_lettered_at = Some(now);
            return Ok(NackOutcome::DeadLettered);
        }

        let visible_at = now + to_chrono(redelivery_delay(entry.attempts));
        entry.status = JobStatus::Pending;
        entry.visible_at = visible_at;
        Ok(NackOutcome::Requeued { visible_at })
    }

    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        let inner = self.inner.lock().await;
        let mut dead: Vec<DeadLetter> = inner
            .jobs
            .values()
            .filter(|e| e.status == JobStatus::DeadLettered)
            .map(|e| DeadLetter {
                descriptor: e.descriptor.clone(),
                attempts: e.attempts,
                last_error: e.last_error.clone(),
                dead_lettered_at: e.dead_lettered_at.unwrap_or_else(Utc::now),
            })
            .collect();
        dead.sort_by(|a, b| b.dead_lettered_at.cmp(&a.dead_lettered_at));
        dead.truncate(limit);
        Ok(dead)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for entry in inner.jobs.values() {
            match entry.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::InFlight => stats.in_flight += 1,
                JobStatus::Acked => stats.acked += 1,
                JobStatus::DeadLettered => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }

    async fn health_check(&self) -> QueueResult<()> {
        self.ensure_open()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn name(&self) -> &str {
        &self.settings.name
    }

    fn visibility_timeout(&self) -> Option<Duration> {
        Some(self.settings.visibility_timeout)
    }

    fn wakeup(&self) -> Option<Arc<Notify>> {
        Some(self.notify.clone())
    }
}
