//! Blob store abstraction trait

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use paperdrop_core::models::{BlobId, StoredBlob};
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable store for uploaded blobs.
///
/// A successful `write` means the bytes are committed: any later `read` of the key, from
/// any process, returns exactly those bytes. A failed or interrupted write leaves nothing
/// readable under the key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Durably store `data` under `storage_key` and describe the result.
    async fn write(
        &self,
        blob_id: BlobId,
        storage_key: &str,
        data: Bytes,
    ) -> StorageResult<StoredBlob>;

    /// Read a whole blob. Missing keys are `StorageError::NotFound`.
    async fn read(&self, storage_key: &str) -> StorageResult<Bytes>;

    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Delete a blob. Deleting a missing key succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Size in bytes of a stored blob.
    async fn content_length(&self, storage_key: &str) -> StorageResult<u64>;

    /// Cheap reachability probe used by the readiness endpoint.
    async fn health_check(&self) -> StorageResult<()>;

    fn backend_type(&self) -> StorageBackend;
}
