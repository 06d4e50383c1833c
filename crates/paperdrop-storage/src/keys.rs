//! Shared key generation for storage backends.
//!
//! Key format: `{doc_type}/{yyyy}/{mm}/{dd}/{blob_id}.{ext}`.

use crate::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use paperdrop_core::models::BlobId;

/// Generate the storage key for a blob.
///
/// Only server-controlled values go into the key. The date partition keeps directories
/// small on the local backend and makes lifecycle rules easy on S3.
pub fn blob_key(doc_type: &str, blob_id: BlobId, extension: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}.{}",
        doc_type,
        at.format("%Y/%m/%d"),
        blob_id,
        extension.trim_start_matches('.')
    )
}

/// Reject keys that could escape the store root or address a hidden file.
pub fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if storage_key.starts_with('/') || storage_key.contains('\\') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    if storage_key
        .split('/')
        .any(|segment| segment.is_empty() || segment.starts_with('.'))
    {
        return Err(StorageError::InvalidKey(
            "Storage key contains an empty, relative or hidden segment".to_string(),
        ));
    }
    Ok(())
}
