//! Job handlers
//!
//! A handler receives the job descriptor and the blob store and returns a JSON result that
//! is stored in the completion marker.

use async_trait::async_trait;
use paperdrop_core::constants::{PDF_MAGIC, PDF_MEDIA_TYPE};
use paperdrop_core::models::JobDescriptor;
use paperdrop_core::JobError;
use paperdrop_storage::digest::sha256_hex;
use paperdrop_storage::{BlobStore, StorageError};
use serde_json::json;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(
        &self,
        job: &JobDescriptor,
        store: &dyn BlobStore,
    ) -> Result<serde_json::Value, JobError>;
}

/// Default handler: confirms the stored blob is the one that was accepted.
///
/// Checks length and SHA-256 against the descriptor and, for PDFs, the file header. A
/// missing or mismatched blob will not fix itself on retry, so those failures are
/// unrecoverable.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentInspector;

impl DocumentInspector {
    pub fn new() -> Self {
        Self
    }
}

/// Version string following `%PDF-` on the first line, e.g. `1.7`.
fn pdf_version(content: &[u8]) -> Option<String> {
    let rest = content.strip_prefix(PDF_MAGIC)?;
    let version: Vec<u8> = rest
        .iter()
        .take(8)
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .copied()
        .collect();
    if version.is_empty() {
        None
    } else {
        String::from_utf8(version).ok()
    }
}

#[async_trait]
impl JobHandler for DocumentInspector {
    #[tracing::instrument(skip(self, job, store), fields(job_id = %job.job_id, blob_id = %job.blob_id))]
    async fn handle(
        &self,
        job: &JobDescriptor,
        store: &dyn BlobStore,
    ) -> Result<serde_json::Value, JobError> {
        let content = match store.read(&job.storage_path).await {
            Ok(content) => content,
            Err(StorageError::NotFound(key)) => {
                return Err(JobError::unrecoverable(anyhow::anyhow!(
                    "Blob {} not found in storage",
                    key
                )));
            }
            Err(e @ StorageError::InvalidKey(_)) => return Err(JobError::unrecoverable(e)),
            Err(e) => return Err(JobError::recoverable(e)),
        };

        if content.len() as u64 != job.size_bytes {
            return Err(JobError::unrecoverable(anyhow::anyhow!(
                "Blob size {} does not match accepted size {}",
                content.len(),
                job.size_bytes
            )));
        }

        let actual = sha256_hex(&content);
        if !actual.eq_ignore_ascii_case(&job.sha256) {
            return Err(JobError::unrecoverable(anyhow::anyhow!(
                "Blob checksum {} does not match accepted checksum {}",
                actual,
                job.sha256
            )));
        }

        let pdf_version = if job.media_type.eq_ignore_ascii_case(PDF_MEDIA_TYPE) {
            if !content.starts_with(PDF_MAGIC) {
                return Err(JobError::unrecoverable(anyhow::anyhow!(
                    "Blob declared as {} has no PDF header",
                    job.media_type
                )));
            }
            pdf_version(&content)
        } else {
            None
        };

        tracing::info!(size_bytes = content.len(), "Document verified");

        Ok(json!({
            "bytes": content.len(),
            "sha256": actual,
            "pdf_version": pdf_version,
        }))
    }
}
