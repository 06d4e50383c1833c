use crate::digest::sha256_hex;
use crate::keys::validate_key;
use crate::traits::{BlobStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use paperdrop_core::models::{BlobId, StoredBlob};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Prefix of in-progress writes. Such files are never addressable by a valid key.
const PARTIAL_PREFIX: &str = ".partial-";

/// Local filesystem blob store
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at `base_path`, creating the directory if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert a storage key to a filesystem path under the base directory.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        validate_key(storage_key)?;
        Ok(self.base_path.join(storage_key))
    }

    /// Create any missing directories above `path` and fsync the parent of each one, so the
    /// new `yyyy/mm/dd` entries are as durable as the blob written into them.
    ///
    /// Returns the directories that were created, outermost first.
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<Vec<PathBuf>> {
        let Some(parent) = path.parent() else {
            return Ok(Vec::new());
        };

        let mut missing = Vec::new();
        let mut cursor = parent;
        while !fs::try_exists(cursor).await? {
            missing.push(cursor.to_path_buf());
            match cursor.parent() {
                Some(up) if !up.as_os_str().is_empty() => cursor = up,
                _ => break,
            }
        }
        if missing.is_empty() {
            return Ok(missing);
        }

        fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;

        missing.reverse();
        for dir in &missing {
            let up = match dir.parent() {
                Some(up) if !up.as_os_str().is_empty() => up,
                _ => Path::new("."),
            };
            sync_dir(up).await?;
        }
        Ok(missing)
    }

    /// Remove `.partial-*` files left behind by writes interrupted by a crash.
    ///
    /// Run once at startup, before the service accepts uploads.
    pub async fn purge_partials(&self) -> StorageResult<usize> {
        let mut removed = 0;
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let name = entry.file_name();
                let name = name.to_string_lossy();

                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if name.starts_with(PARTIAL_PREFIX) {
                    match fs::remove_file(entry.path()).await {
                        Ok(()) => removed += 1,
                        Err(e) => tracing::warn!(
                            path = %entry.path().display(),
                            error = %e,
                            "Failed to remove partial upload"
                        ),
                    }
                }
            }
        }

        if removed > 0 {
            tracing::info!(
                removed,
                base_path = %self.base_path.display(),
                "Purged partial uploads"
            );
        }
        Ok(removed)
    }
}

/// fsync a directory so entries created or renamed inside it survive a crash.
async fn sync_dir(dir: &Path) -> StorageResult<()> {
    let result = match fs::File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    result.map_err(|e| {
        StorageError::WriteFailed(format!("Failed to sync directory {}: {}", dir.display(), e))
    })
}

#[async_trait]
impl BlobStore for LocalStorage {
    #[tracing::instrument(skip(self, data), fields(blob_id = %blob_id, size_bytes = data.len()))]
    async fn write(
        &self,
        blob_id: BlobId,
        storage_key: &str,
        data: Bytes,
    ) -> StorageResult<StoredBlob> {
        let path = self.key_to_path(storage_key)?;
        self.ensure_parent_dir(&path).await?;

        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(storage_key.to_string()))?
            .to_path_buf();
        let partial = parent.join(format!("{}{}", PARTIAL_PREFIX, Uuid::new_v4()));

        let start = std::time::Instant::now();
        let sha256 = sha256_hex(&data);

        let result: StorageResult<()> = async {
            let mut file = fs::File::create(&partial).await.map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to create file {}: {}",
                    partial.display(),
                    e
                ))
            })?;

            file.write_all(&data).await.map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to write file {}: {}",
                    partial.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to sync file {}: {}",
                    partial.display(),
                    e
                ))
            })?;

            fs::rename(&partial, &path).await.map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to move {} into place: {}",
                    path.display(),
                    e
                ))
            })
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&partial).await;
            tracing::error!(key = %storage_key, error = %e, "Local storage write failed");
            return Err(e);
        }

        // Until the directory entry is on disk the blob may not survive a crash, and a job
        // must never reference such a blob.
        if let Err(e) = sync_dir(&parent).await {
            tracing::error!(key = %storage_key, error = %e, "Local storage write not durable");
            return Err(e);
        }

        tracing::info!(
            path = %path.display(),
            key = %storage_key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage write successful"
        );

        Ok(StoredBlob {
            blob_id,
            storage_key: storage_key.to_string(),
            size_bytes: data.len() as u64,
            sha256,
        })
    }

    async fn read(&self, storage_key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(storage_key)?;
        let start = std::time::Instant::now();

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(storage_key.to_string()));
            }
            Err(e) => {
                return Err(StorageError::ReadFailed(format!(
                    "Failed to read file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        tracing::debug!(
            key = %storage_key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage read successful"
        );

        Ok(Bytes::from(data))
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(storage_key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(key = %storage_key, "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        let path = self.key_to_path(storage_key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(storage_key.to_string()))
            }
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn health_check(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.base_path).await.map_err(|e| {
            StorageError::BackendError(format!(
                "Storage directory {} unavailable: {}",
                self.base_path.display(),
                e
            ))
        })?;
        if !meta.is_dir() || meta.permissions().readonly() {
            return Err(StorageError::BackendError(format!(
                "Storage directory {} is not writable",
                self.base_path.display()
            )));
        }
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use crate::keys::blob_key;
    use chrono::Utc;
    use tempfile::tempdir;

    async fn storage(dir: &tempfile::TempDir) -> LocalStorage {
        LocalStorage::new(dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let blob_id = BlobId::generate();
        let key = blob_key("pdf", blob_id, "pdf", Utc::now());
        let data = Bytes::from_static(b"%PDF-1.7 test");

        let stored = storage.write(blob_id, &key, data.clone()).await.unwrap();
        assert_eq!(stored.blob_id, blob_id);
        assert_eq!(stored.storage_key, key);
        assert_eq!(stored.size_bytes, data.len() as u64);
        assert_eq!(stored.sha256, sha256_hex(&data));

        assert_eq!(storage.read(&key).await.unwrap(), data);
        assert_eq!(storage.content_length(&key).await.unwrap(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_write_leaves_no_partial_files() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let blob_id = BlobId::generate();
        let key = blob_key("pdf", blob_id, "pdf", Utc::now());
        storage
            .write(blob_id, &key, Bytes::from_static(b"content"))
            .await
            .unwrap();

        let parent = dir.path().join(&key);
        let parent = parent.parent().unwrap();
        let mut entries = std::fs::read_dir(parent).unwrap();
        let only = entries.next().unwrap().unwrap();
        assert!(entries.next().is_none());
        assert!(!only.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX));
    }

    #[tokio::test]
    async fn test_first_write_of_day_creates_and_syncs_each_directory() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;
        let path = dir.path().join("pdf/2026/10/18/a.pdf");

        let created = storage.ensure_parent_dir(&path).await.unwrap();
        assert_eq!(
            created,
            vec![
                dir.path().join("pdf"),
                dir.path().join("pdf/2026"),
                dir.path().join("pdf/2026/10"),
                dir.path().join("pdf/2026/10/18"),
            ]
        );
        assert!(dir.path().join("pdf/2026/10/18").is_dir());

        let again = storage
            .ensure_parent_dir(&dir.path().join("pdf/2026/10/18/b.pdf"))
            .await
            .unwrap();
        assert!(again.is_empty());

        let next_day = storage
            .ensure_parent_dir(&dir.path().join("pdf/2026/10/19/c.pdf"))
            .await
            .unwrap();
        assert_eq!(next_day, vec![dir.path().join("pdf/2026/10/19")]);
    }

    #[tokio::test]
    async fn test_directory_sync_failure_is_a_write_error() {
        let dir = tempdir().unwrap();
        let result = sync_dir(&dir.path().join("gone")).await;
        assert!(matches!(result, Err(StorageError::WriteFailed(_))));
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let result = storage.read("pdf/2026/01/01/missing.pdf").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(!storage.exists("pdf/2026/01/01/missing.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let result = storage.read("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage
            .write(BlobId::generate(), "../escape.pdf", Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        assert!(storage.delete("pdf/nonexistent.pdf").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_partials_removes_only_partials() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let blob_id = BlobId::generate();
        let key = blob_key("pdf", blob_id, "pdf", Utc::now());
        storage
            .write(blob_id, &key, Bytes::from_static(b"kept"))
            .await
            .unwrap();

        let nested = dir.path().join("pdf/2026/01/01");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join(".partial-crashed"), b"half").unwrap();
        std::fs::write(dir.path().join(".partial-root"), b"half").unwrap();

        assert_eq!(storage.purge_partials().await.unwrap(), 2);
        assert!(!nested.join(".partial-crashed").exists());
        assert!(storage.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;
        assert!(storage.health_check().await.is_ok());
        assert_eq!(storage.backend_type(), StorageBackend::Local);
    }
}
