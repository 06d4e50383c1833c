//! Reconciliation of orphaned blobs
//!
//! Each sweep takes the orphan ledger's pending records, checks the blob is still in the
//! store and re-enqueues the recorded descriptor. The queue deduplicates on `job_id`, so a
//! record whose original enqueue did land (but was never confirmed) is harmless.

use paperdrop_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ledger::OrphanLedger;
use crate::queue::JobQueue;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub requeued: usize,
    /// Records dropped because their blob is gone.
    pub missing_blob: usize,
    /// Records left in the ledger for the next sweep.
    pub deferred: usize,
}

pub struct Reconciler {
    ledger: Arc<dyn OrphanLedger>,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn BlobStore>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn OrphanLedger>,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            ledger,
            queue,
            store,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> anyhow::Result<SweepReport> {
        let records = self.ledger.pending().await?;
        let mut report = SweepReport {
            examined: records.len(),
            ..SweepReport::default()
        };

        for record in records {
            let job = &record.descriptor;

            match self.store.exists(&job.storage_path).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::error!(
                        job_id = %job.job_id,
                        blob_id = %job.blob_id,
                        storage_key = %job.storage_path,
                        "Orphaned blob no longer exists, dropping record"
                    );
                    self.ledger.resolve(job.job_id).await?;
                    report.missing_blob += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, error = %e, "Blob check failed, deferring orphan");
                    report.deferred += 1;
                    continue;
                }
            }

            match self.queue.enqueue(job).await {
                Ok(()) => {
                    self.ledger.resolve(job.job_id).await?;
                    report.requeued += 1;
                    tracing::info!(
                        job_id = %job.job_id,
                        blob_id = %job.blob_id,
                        recorded_at = %record.recorded_at,
                        "Orphaned blob re-enqueued"
                    );
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, error = %e, "Re-enqueue failed, deferring orphan");
                    report.deferred += 1;
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                requeued = report.requeued,
                missing_blob = report.missing_blob,
                deferred = report.deferred,
                "Reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until shut down. The first sweep runs immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReconcilerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::error!(error = %e, "Reconciliation sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::info!("Reconciler stopped");
        });

        ReconcilerHandle { shutdown_tx, join }
    }
}

pub struct ReconcilerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Reconciler task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::FileOrphanLedger;
    use crate::queue::{MemoryJobQueue, QueueSettings};
    use bytes::Bytes;
    use chrono::Utc;
    use paperdrop_core::models::{BlobId, JobDescriptor};
    use paperdrop_storage::{blob_key, LocalStorage};
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<LocalStorage>,
        queue: Arc<MemoryJobQueue>,
        ledger: Arc<FileOrphanLedger>,
        reconciler: Reconciler,
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path().join("blobs")).await.unwrap());
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings::default()));
        let ledger = Arc::new(
            FileOrphanLedger::new(dir.path().join("orphans"))
                .await
                .unwrap(),
        );
        let reconciler = Reconciler::new(ledger.clone(), queue.clone(), store.clone());
        Fixture {
            _dir: dir,
            store,
            queue,
            ledger,
            reconciler,
        }
    }

    async fn orphan(fx: &Fixture) -> JobDescriptor {
        let blob_id = BlobId::generate();
        let key = blob_key("pdf", blob_id, "pdf", Utc::now());
        let blob = fx
            .store
            .write(blob_id, &key, Bytes::from_static(b"%PDF-1.7"))
            .await
            .unwrap();
        let job = JobDescriptor::for_blob(&blob, "pdf", "a.pdf", "application/pdf");
        fx.ledger.record(&job, "enqueue timed out").await.unwrap();
        job
    }

    #[tokio::test]
    async fn sweep_requeues_with_same_job_id() {
        let fx = fixture().await;
        let job = orphan(&fx).await;

        let report = fx.reconciler.sweep().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert!(fx.ledger.pending().await.unwrap().is_empty());

        let queued = fx.queue.descriptors().await;
        assert_eq!(queued, vec![job]);
    }

    #[tokio::test]
    async fn sweep_is_idempotent_when_job_already_queued() {
        let fx = fixture().await;
        let job = orphan(&fx).await;
        fx.queue.enqueue(&job).await.unwrap();

        fx.reconciler.sweep().await.unwrap();
        assert_eq!(fx.queue.len().await, 1);
    }

    #[tokio::test]
    async fn sweep_drops_records_whose_blob_is_gone() {
        let fx = fixture().await;
        let job = orphan(&fx).await;
        fx.store.delete(&job.storage_path).await.unwrap();

        let report = fx.reconciler.sweep().await.unwrap();
        assert_eq!(report.missing_blob, 1);
        assert!(fx.queue.is_empty().await);
        assert!(fx.ledger.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_defers_while_queue_is_down() {
        let fx = fixture().await;
        orphan(&fx).await;
        fx.queue.close().await;

        let report = fx.reconciler.sweep().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(fx.ledger.pending().await.unwrap().len(), 1);
    }
}
