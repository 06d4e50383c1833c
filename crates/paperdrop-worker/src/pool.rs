//! Worker pool: claims deliveries from a [`JobQueue`] and runs them through a [`JobHandler`].
//!
//! The pool wakes on the queue's notification (when the backend offers one) and otherwise
//! polls. Concurrency is bounded by a semaphore; a claim is only attempted while a permit is
//! free, so nothing is leased that cannot be worked on straight away.

use paperdrop_core::config::WorkerConfig;
use paperdrop_core::models::{AckHandle, Delivery, NackOutcome};
use paperdrop_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::completion::CompletionStore;
use crate::handler::JobHandler;
use crate::queue::{JobQueue, QueueError};

#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    /// Upper bound on one handler run. Capped below the queue's visibility timeout.
    pub job_timeout: Duration,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for WorkerPoolConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

struct Shared {
    queue: Arc<dyn JobQueue>,
    completions: Arc<dyn CompletionStore>,
    handler: Arc<dyn JobHandler>,
    store: Arc<dyn BlobStore>,
    config: WorkerPoolConfig,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
}

enum ClaimOutcome {
    Dispatched,
    Idle,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        completions: Arc<dyn CompletionStore>,
        handler: Arc<dyn JobHandler>,
        store: Arc<dyn BlobStore>,
        config: WorkerPoolConfig,
    ) -> Self {
        let config = Self::fit_to_lease(config, queue.visibility_timeout());
        Self {
            shared: Arc::new(Shared {
                queue,
                completions,
                handler,
                store,
                config,
            }),
        }
    }

    /// A handler still running when its lease expires would be claimed again while it runs,
    /// so the job timeout is capped at four fifths of the queue's visibility timeout.
    fn fit_to_lease(
        mut config: WorkerPoolConfig,
        visibility: Option<Duration>,
    ) -> WorkerPoolConfig {
        if let Some(visibility) = visibility {
            let ceiling = visibility * 4 / 5;
            if config.job_timeout > ceiling {
                tracing::warn!(
                    job_timeout_ms = config.job_timeout.as_millis() as u64,
                    visibility_timeout_ms = visibility.as_millis() as u64,
                    "Job timeout exceeds the queue lease, capping it"
                );
                config.job_timeout = ceiling;
            }
        }
        config
    }

    /// Spawn the claim loop.
    pub fn start(self) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(Self::run(self.shared, shutdown_rx));
        WorkerPoolHandle { shutdown_tx, join }
    }

    async fn run(shared: Arc<Shared>, mut shutdown_rx: mpsc::Receiver<()>) {
        let config = shared.config.clone();
        let wakeup = shared.queue.wakeup().unwrap_or_else(|| Arc::new(Notify::new()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));

        tracing::info!(
            queue = %shared.queue.name(),
            max_concurrency = config.max_concurrency,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            job_timeout_ms = config.job_timeout.as_millis() as u64,
            "Worker pool started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Worker pool shutting down");
                    break;
                }
                _ = wakeup.notified() => {
                    Self::drain(&shared, &semaphore).await;
                }
                _ = sleep(config.poll_interval) => {
                    Self::drain(&shared, &semaphore).await;
                }
            }
        }

        // Wait for in-flight jobs by reclaiming every permit.
        let permits = u32::try_from(config.max_concurrency).unwrap_or(u32::MAX);
        match tokio::time::timeout(config.shutdown_grace, semaphore.acquire_many(permits)).await {
            Ok(_) => tracing::info!("Worker pool stopped"),
            Err(_) => tracing::warn!(
                grace_secs = config.shutdown_grace.as_secs(),
                "Worker pool stopped with jobs still running; their leases will expire and be redelivered"
            ),
        };
    }

    /// Claim and dispatch until the queue is empty or every worker is busy.
    async fn drain(shared: &Arc<Shared>, semaphore: &Arc<Semaphore>) {
        while let ClaimOutcome::Dispatched = Self::claim_and_dispatch_one(shared, semaphore).await {}
    }

    async fn claim_and_dispatch_one(shared: &Arc<Shared>, semaphore: &Arc<Semaphore>) -> ClaimOutcome {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return ClaimOutcome::Idle;
            }
        };

        match shared.queue.dequeue().await {
            Ok(Some(delivery)) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    Self::process_delivery(&shared, delivery).await;
                });
                ClaimOutcome::Dispatched
            }
            Ok(None) => {
                tracing::trace!("No jobs available in queue");
                ClaimOutcome::Idle
            }
            Err(QueueError::Closed) => {
                tracing::debug!("Queue closed, skipping claim");
                ClaimOutcome::Idle
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim job from queue");
                ClaimOutcome::Idle
            }
        }
    }

    #[tracing::instrument(
        skip(shared, delivery),
        fields(
            job_id = %delivery.descriptor.job_id,
            blob_id = %delivery.descriptor.blob_id,
            attempt = delivery.handle.attempt
        )
    )]
    async fn process_delivery(shared: &Shared, delivery: Delivery) {
        let Delivery { descriptor, handle } = delivery;

        match shared.completions.is_completed(descriptor.job_id).await {
            Ok(true) => {
                tracing::info!("Job already completed, acknowledging redelivery");
                Self::ack(shared, &handle).await;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Completion check failed");
                Self::nack(shared, &handle, &format!("completion check failed: {:#}", e), false)
                    .await;
                return;
            }
        }

        let result = tokio::time::timeout(
            shared.config.job_timeout,
            shared.handler.handle(&descriptor, shared.store.as_ref()),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                if let Err(e) = shared
                    .completions
                    .mark_completed(descriptor.job_id, &output)
                    .await
                {
                    // Without a marker an ack would let a lost-ack redelivery run the
                    // handler again; leave the job to be retried instead.
                    tracing::error!(error = %e, "Failed to record completion");
                    Self::nack(shared, &handle, &format!("completion write failed: {:#}", e), false)
                        .await;
                    return;
                }
                tracing::info!("Job completed");
                Self::ack(shared, &handle).await;
            }
            Ok(Err(e)) => {
                let permanent = !e.is_recoverable();
                tracing::warn!(error = %e, permanent, "Job failed");
                Self::nack(shared, &handle, &format!("{:#}", e.inner()), permanent).await;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = shared.config.job_timeout.as_secs(),
                    "Job timed out"
                );
                let message = format!(
                    "job timed out after {}s",
                    shared.config.job_timeout.as_secs()
                );
                Self::nack(shared, &handle, &message, false).await;
            }
        }
    }

    async fn ack(shared: &Shared, handle: &AckHandle) {
        match shared.queue.ack(handle).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                lease_id = %handle.lease_id,
                "Ack rejected, lease expired and job was reclaimed"
            ),
            Err(e) => tracing::error!(error = %e, "Ack failed, job will be redelivered"),
        }
    }

    async fn nack(
        shared: &Shared,
        handle: &AckHandle,
        error: &str,
        permanent: bool,
    ) {
        match shared.queue.nack(handle, error, permanent).await {
            Ok(NackOutcome::Requeued { visible_at }) => {
                tracing::info!(visible_at = %visible_at, "Job requeued");
            }
            Ok(NackOutcome::DeadLettered) => {
                tracing::error!(error = %error, "Job dead-lettered");
            }
            Ok(NackOutcome::StaleLease) => {
                tracing::warn!(lease_id = %handle.lease_id, "Nack rejected, lease is stale");
            }
            Err(e) => tracing::error!(error = %e, "Nack failed, lease will expire"),
        }
    }
}

pub struct WorkerPoolHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerPoolHandle {
    /// Stop claiming and wait (up to the grace period) for running jobs.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Worker pool task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::MemoryCompletionStore;
    use crate::handler::DocumentInspector;
    use crate::queue::{MemoryJobQueue, QueueSettings};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use crate::queue::QueueResult;
    use paperdrop_core::models::{BlobId, DeadLetter, JobDescriptor, JobStatus, QueueStats};
    use paperdrop_core::JobError;
    use paperdrop_storage::{blob_key, LocalStorage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct Counting<H> {
        inner: H,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl<H: JobHandler> JobHandler for Counting<H> {
        async fn handle(
            &self,
            job: &JobDescriptor,
            store: &dyn BlobStore,
        ) -> Result<serde_json::Value, JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.handle(job, store).await
        }
    }

    struct Hangs;

    #[async_trait]
    impl JobHandler for Hangs {
        async fn handle(
            &self,
            _job: &JobDescriptor,
            _store: &dyn BlobStore,
        ) -> Result<serde_json::Value, JobError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(serde_json::Value::Null)
        }
    }

    struct Sleeps(Duration);

    #[async_trait]
    impl JobHandler for Sleeps {
        async fn handle(
            &self,
            _job: &JobDescriptor,
            _store: &dyn BlobStore,
        ) -> Result<serde_json::Value, JobError> {
            sleep(self.0).await;
            Ok(serde_json::Value::Null)
        }
    }

    /// Swallows the first ack without forwarding it, as if the reply was lost.
    struct LosesFirstAck {
        inner: MemoryJobQueue,
        lost: AtomicBool,
    }

    #[async_trait]
    impl JobQueue for LosesFirstAck {
        async fn enqueue(&self, job: &JobDescriptor) -> QueueResult<()> {
            self.inner.enqueue(job).await
        }

        async fn dequeue(&self) -> QueueResult<Option<Delivery>> {
            self.inner.dequeue().await
        }

        async fn ack(&self, handle: &AckHandle) -> QueueResult<bool> {
            if !self.lost.swap(true, Ordering::SeqCst) {
                return Err(QueueError::Unavailable("connection reset".to_string()));
            }
            self.inner.ack(handle).await
        }

        async fn nack(
            &self,
            handle: &AckHandle,
            error: &str,
            permanent: bool,
        ) -> QueueResult<NackOutcome> {
            self.inner.nack(handle, error, permanent).await
        }

        async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
            self.inner.dead_letters(limit).await
        }

        async fn stats(&self) -> QueueResult<QueueStats> {
            self.inner.stats().await
        }

        async fn health_check(&self) -> QueueResult<()> {
            self.inner.health_check().await
        }

        async fn close(&self) {
            self.inner.close().await
        }

        fn name(&self) -> &str {
            self.inner.name()
        }

        fn visibility_timeout(&self) -> Option<Duration> {
            self.inner.visibility_timeout()
        }
    }

    fn fast_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            max_concurrency: 2,
            poll_interval: Duration::from_millis(10),
            job_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    async fn put(store: &LocalStorage, content: &'static [u8]) -> JobDescriptor {
        let blob_id = BlobId::generate();
        let key = blob_key("pdf", blob_id, "pdf", Utc::now());
        let blob = store
            .write(blob_id, &key, Bytes::from_static(content))
            .await
            .unwrap();
        JobDescriptor::for_blob(&blob, "pdf", "doc.pdf", "application/pdf")
    }

    async fn wait_for_status(
        queue: &MemoryJobQueue,
        job_id: uuid::Uuid,
        want: JobStatus,
        min_attempts: u32,
    ) -> u32 {
        for _ in 0..200 {
            if let Some((status, attempts)) = queue.status(job_id).await {
                if status == want && attempts >= min_attempts {
                    return attempts;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {:?}", job_id, want);
    }

    #[tokio::test]
    async fn completes_job_and_records_marker() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings::default()));
        let completions = Arc::new(MemoryCompletionStore::new());
        let job = put(&store, b"%PDF-1.7\nok").await;
        queue.enqueue(&job).await.unwrap();

        let handle = WorkerPool::new(
            queue.clone(),
            completions.clone(),
            Arc::new(DocumentInspector::new()),
            store.clone(),
            fast_config(),
        )
        .start();

        wait_for_status(&queue, job.job_id, JobStatus::Acked, 1).await;
        handle.shutdown().await;

        let marker = completions.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(marker.result["pdf_version"], "1.7");
    }

    #[tokio::test]
    async fn redelivered_completed_job_skips_handler() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings::default()));
        let completions = Arc::new(MemoryCompletionStore::new());
        let job = put(&store, b"%PDF-1.7").await;
        completions
            .mark_completed(job.job_id, &serde_json::json!({}))
            .await
            .unwrap();
        queue.enqueue(&job).await.unwrap();

        let handler = Arc::new(Counting {
            inner: DocumentInspector::new(),
            calls: AtomicUsize::new(0),
        });
        let handle = WorkerPool::new(
            queue.clone(),
            completions,
            handler.clone(),
            store,
            fast_config(),
        )
        .start();

        wait_for_status(&queue, job.job_id, JobStatus::Acked, 1).await;
        handle.shutdown().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unrecoverable_failure_is_dead_lettered() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings::default()));
        let completions = Arc::new(MemoryCompletionStore::new());
        let job = put(&store, b"%PDF-1.7").await;
        store.delete(&job.storage_path).await.unwrap();
        queue.enqueue(&job).await.unwrap();

        let handle = WorkerPool::new(
            queue.clone(),
            completions.clone(),
            Arc::new(DocumentInspector::new()),
            store,
            fast_config(),
        )
        .start();

        let attempts = wait_for_status(&queue, job.job_id, JobStatus::DeadLettered, 1).await;
        handle.shutdown().await;

        assert_eq!(attempts, 1);
        assert!(completions.is_empty().await);
        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0]
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("not found")));
    }

    #[tokio::test]
    async fn timed_out_job_is_requeued() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings::default()));
        let job = put(&store, b"%PDF-1.7").await;
        queue.enqueue(&job).await.unwrap();

        let config = WorkerPoolConfig {
            job_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let handle = WorkerPool::new(
            queue.clone(),
            Arc::new(MemoryCompletionStore::new()),
            Arc::new(Hangs),
            store,
            config,
        )
        .start();

        let attempts = wait_for_status(&queue, job.job_id, JobStatus::Pending, 1).await;
        handle.shutdown().await;
        assert_eq!(attempts, 1);
    }

    #[test]
    fn job_timeout_is_capped_below_lease() {
        let capped = WorkerPool::fit_to_lease(fast_config(), Some(Duration::from_secs(1)));
        assert_eq!(capped.job_timeout, Duration::from_millis(800));

        let untouched = WorkerPool::fit_to_lease(fast_config(), Some(Duration::from_secs(60)));
        assert_eq!(untouched.job_timeout, Duration::from_secs(5));

        let no_lease = WorkerPool::fit_to_lease(fast_config(), None);
        assert_eq!(no_lease.job_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn slow_handler_is_never_run_twice_at_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings {
            visibility_timeout: Duration::from_millis(500),
            ..QueueSettings::default()
        }));
        let job = put(&store, b"%PDF-1.7").await;
        queue.enqueue(&job).await.unwrap();

        // Outlives the lease; the configured 5s timeout alone would let a second claim in.
        let handler = Arc::new(Counting {
            inner: Sleeps(Duration::from_millis(700)),
            calls: AtomicUsize::new(0),
        });
        let handle = WorkerPool::new(
            queue.clone(),
            Arc::new(MemoryCompletionStore::new()),
            handler.clone(),
            store,
            fast_config(),
        )
        .start();

        sleep(Duration::from_millis(1200)).await;
        handle.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let (status, attempts) = queue.status(job.job_id).await.unwrap();
        assert_eq!(status, JobStatus::Pending);
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn lost_ack_redelivery_is_acked_without_rerunning() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let queue = Arc::new(LosesFirstAck {
            inner: MemoryJobQueue::new(QueueSettings {
                visibility_timeout: Duration::from_millis(200),
                ..QueueSettings::default()
            }),
            lost: AtomicBool::new(false),
        });
        let completions = Arc::new(MemoryCompletionStore::new());
        let job = put(&store, b"%PDF-1.7\nok").await;
        queue.enqueue(&job).await.unwrap();

        let handler = Arc::new(Counting {
            inner: DocumentInspector::new(),
            calls: AtomicUsize::new(0),
        });
        let handle = WorkerPool::new(
            queue.clone(),
            completions.clone(),
            handler.clone(),
            store,
            fast_config(),
        )
        .start();

        let attempts = wait_for_status(&queue.inner, job.job_id, JobStatus::Acked, 2).await;
        handle.shutdown().await;

        assert_eq!(attempts, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(completions.get(job.job_id).await.unwrap().is_some());
    }
}
