//! Failure-injecting stand-ins for the queue, the blob store and the orphan ledger.

use async_trait::async_trait;
use bytes::Bytes;
use paperdrop_core::models::{
    AckHandle, BlobId, DeadLetter, Delivery, JobDescriptor, NackOutcome, QueueStats, StoredBlob,
};
use paperdrop_storage::{BlobStore, StorageBackend, StorageError, StorageResult};
use paperdrop_worker::{
    JobQueue, LedgerError, MemoryJobQueue, OrphanLedger, OrphanRecord, QueueError, QueueResult,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

type LedgerResult<T> = Result<T, LedgerError>;

/// Every enqueue hangs until the caller's timeout fires.
#[derive(Default)]
pub struct HangingQueue {
    pub enqueue_calls: AtomicU32,
}

#[async_trait]
impl JobQueue for HangingQueue {
    async fn enqueue(&self, _job: &JobDescriptor) -> QueueResult<()> {
        self.enqueue_calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<Delivery>> {
        Ok(None)
    }

    async fn ack(&self, _handle: &AckHandle) -> QueueResult<bool> {
        Ok(false)
    }

    async fn nack(
        &self,
        _handle: &AckHandle,
        _error: &str,
        _permanent: bool,
    ) -> QueueResult<NackOutcome> {
        Ok(NackOutcome::StaleLease)
    }

    async fn dead_letters(&self, _limit: usize) -> QueueResult<Vec<DeadLetter>> {
        Ok(Vec::new())
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(QueueStats::default())
    }

    async fn health_check(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn close(&self) {}

    fn name(&self) -> &str {
        "hanging"
    }
}

/// Every write fails; nothing is ever stored.
pub struct BrokenStore;

#[async_trait]
impl BlobStore for BrokenStore {
    async fn write(
        &self,
        _blob_id: BlobId,
        _storage_key: &str,
        _data: Bytes,
    ) -> StorageResult<StoredBlob> {
        Err(StorageError::WriteFailed("disk is read-only".to_string()))
    }

    async fn read(&self, storage_key: &str) -> StorageResult<Bytes> {
        Err(StorageError::NotFound(storage_key.to_string()))
    }

    async fn exists(&self, _storage_key: &str) -> StorageResult<bool> {
        Ok(false)
    }

    async fn delete(&self, _storage_key: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        Err(StorageError::NotFound(storage_key.to_string()))
    }

    async fn health_check(&self) -> StorageResult<()> {
        Err(StorageError::BackendError("disk is read-only".to_string()))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

/// Wraps a [`MemoryJobQueue`] and changes how `enqueue` behaves; everything else passes
/// straight through.
pub struct WrappedQueue {
    pub inner: Arc<MemoryJobQueue>,
    pub enqueue_calls: AtomicU32,
    mode: EnqueueMode,
}

enum EnqueueMode {
    /// The first call stores the job but reports a failure, as if the reply was lost.
    LoseFirstConfirmation,
    /// Every call waits this long before storing the job.
    Delay(Duration),
}

impl WrappedQueue {
    pub fn losing_first_confirmation(inner: Arc<MemoryJobQueue>) -> Self {
        Self {
            inner,
            enqueue_calls: AtomicU32::new(0),
            mode: EnqueueMode::LoseFirstConfirmation,
        }
    }

    pub fn slow(inner: Arc<MemoryJobQueue>, delay: Duration) -> Self {
        Self {
            inner,
            enqueue_calls: AtomicU32::new(0),
            mode: EnqueueMode::Delay(delay),
        }
    }
}

#[async_trait]
impl JobQueue for WrappedQueue {
    async fn enqueue(&self, job: &JobDescriptor) -> QueueResult<()> {
        let call = self.enqueue_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.mode {
            EnqueueMode::LoseFirstConfirmation => {
                self.inner.enqueue(job).await?;
                if call == 1 {
                    return Err(QueueError::Unavailable("connection reset".to_string()));
                }
                Ok(())
            }
            EnqueueMode::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.inner.enqueue(job).await
            }
        }
    }

    async fn dequeue(&self) -> QueueResult<Option<Delivery>> {
        self.inner.dequeue().await
    }

    async fn ack(&self, handle: &AckHandle) -> QueueResult<bool> {
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
}

/// Every record fails, as if the ledger's disk were full.
pub struct BrokenLedger;

#[async_trait]
impl OrphanLedger for BrokenLedger {
    async fn record(&self, _descriptor: &JobDescriptor, _reason: &str) -> LedgerResult<()> {
        Err(LedgerError::Io(std::io::Error::other("no space left on device")))
    }

    async fn pending(&self) -> LedgerResult<Vec<OrphanRecord>> {
        Ok(Vec::new())
    }

    async fn resolve(&self, _job_id: Uuid) -> LedgerResult<()> {
        Ok(())
    }
}

/// Collects formatted log output so tests can assert on it.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
