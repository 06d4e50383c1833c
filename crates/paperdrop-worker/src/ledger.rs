//! Orphan ledger
//!
//! An orphan is a blob that was durably stored but whose job could not be confirmed on the
//! queue. The receiver records the full descriptor here so the [`crate::Reconciler`] can
//! enqueue it later with the same `job_id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paperdrop_core::models::JobDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanRecord {
    pub descriptor: JobDescriptor,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrphanLedger: Send + Sync {
    /// Durably record an orphan. Recording the same job twice keeps one record.
    async fn record(&self, descriptor: &JobDescriptor, reason: &str) -> LedgerResult<()>;

    /// Unresolved records, oldest first.
    async fn pending(&self) -> LedgerResult<Vec<OrphanRecord>>;

    /// Remove a record once its job is on the queue (or can never be).
    async fn resolve(&self, job_id: Uuid) -> LedgerResult<()>;
}

const RECORD_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".tmp-";

/// One JSON file per orphan, named `{job_id}.json`.
///
/// Kept on the local filesystem so it works when the queue backend is the thing that
/// is down.
pub struct FileOrphanLedger {
    dir: PathBuf,
}

impl FileOrphanLedger {
    pub async fn new(dir: impl Into<PathBuf>) -> LedgerResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", job_id, RECORD_EXTENSION))
    }
}

#[async_trait]
impl OrphanLedger for FileOrphanLedger {
    async fn record(&self, descriptor: &JobDescriptor, reason: &str) -> LedgerResult<()> {
        let record = OrphanRecord {
            descriptor: descriptor.clone(),
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&record)?;

        let target = self.record_path(descriptor.job_id);
        let temp = self
            .dir
            .join(format!("{}{}-{}", TEMP_PREFIX, descriptor.job_id, Uuid::new_v4()));

        let written: LedgerResult<()> = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            fs::rename(&temp, &target).await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        tracing::warn!(
            job_id = %descriptor.job_id,
            blob_id = %descriptor.blob_id,
            storage_key = %descriptor.storage_path,
            reason = %reason,
            "Recorded orphaned blob for reconciliation"
        );
        Ok(())
    }

    async fn pending(&self) -> LedgerResult<Vec<OrphanRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path
                .extension()
                .is_some_and(|ext| ext == RECORD_EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }

            let body = fs::read(&path).await?;
            match serde_json::from_slice::<OrphanRecord>(&body) {
                Ok(record) => records.push(record),
                Err(e) => tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Unreadable orphan record, skipping"
                ),
            }
        }

        records.sort_by_key(|r| r.recorded_at);
        Ok(records)
    }

    async fn resolve(&self, job_id: Uuid) -> LedgerResult<()> {
        match fs::remove_file(self.record_path(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperdrop_core::models::{BlobId, StoredBlob};
    use tempfile::tempdir;

    fn descriptor() -> JobDescriptor {
        let blob = StoredBlob {
            blob_id: BlobId::generate(),
            storage_key: "pdf/2026/10/18/x.pdf".to_string(),
            size_bytes: 4,
            sha256: "00".repeat(32),
        };
        JobDescriptor::for_blob(&blob, "pdf", "x.pdf", "application/pdf")
    }

    #[tokio::test]
    async fn record_pending_resolve() {
        let dir = tempdir().unwrap();
        let ledger = FileOrphanLedger::new(dir.path().join("orphans")).await.unwrap();
        let job = descriptor();

        ledger.record(&job, "enqueue timed out").await.unwrap();
        ledger.record(&job, "enqueue timed out again").await.unwrap();

        let pending = ledger.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].descriptor, job);
        assert_eq!(pending[0].reason, "enqueue timed out again");

        ledger.resolve(job.job_id).await.unwrap();
        assert!(ledger.pending().await.unwrap().is_empty());
        // Resolving twice is fine.
        ledger.resolve(job.job_id).await.unwrap();
    }

    #[tokio::test]
    async fn ignores_temp_and_corrupt_files() {
        let dir = tempdir().unwrap();
        let ledger = FileOrphanLedger::new(dir.path()).await.unwrap();

        std::fs::write(dir.path().join(".tmp-abc"), b"{").unwrap();
        std::fs::write(dir.path().join("broken.json"), b"not json").unwrap();
        ledger.record(&descriptor(), "queue down").await.unwrap();

        assert_eq!(ledger.pending().await.unwrap().len(), 1);
    }
}
