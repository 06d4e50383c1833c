use crate::digest::sha256_hex;
use crate::keys::validate_key;
use crate::traits::{BlobStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult};
use paperdrop_core::models::{BlobId, StoredBlob};

/// Key probed by `health_check`. Its absence is the expected answer.
const HEALTH_PROBE_KEY: &str = "health/probe";

/// S3 blob store
///
/// A single PUT is atomic on S3: readers see either no object or the whole object.
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// `endpoint_url` selects an S3-compatible provider (e.g. "http://localhost:9000" for
    /// MinIO). Credentials come from the usual AWS environment variables.
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage { store, bucket })
    }

    fn location(storage_key: &str) -> StorageResult<Path> {
        validate_key(storage_key)?;
        Ok(Path::from(storage_key.to_string()))
    }
}

#[async_trait]
impl BlobStore for S3Storage {
    #[tracing::instrument(skip(self, data), fields(blob_id = %blob_id, s3.bucket = %self.bucket, size_bytes = data.len()))]
    async fn write(
        &self,
        blob_id: BlobId,
        storage_key: &str,
        data: Bytes,
    ) -> StorageResult<StoredBlob> {
        let location = Self::location(storage_key)?;
        let size = data.len() as u64;
        let sha256 = sha256_hex(&data);

        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.put(&location, PutPayload::from(data)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                key = %storage_key,
                size_bytes = size,
                "S3 write failed"
            );
            StorageError::WriteFailed(e.to_string())
        })?;

        tracing::info!(
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 write successful"
        );

        Ok(StoredBlob {
            blob_id,
            storage_key: storage_key.to_string(),
            size_bytes: size,
            sha256,
        })
    }

    async fn read(&self, storage_key: &str) -> StorageResult<Bytes> {
        let location = Self::location(storage_key)?;
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.get(&location).await;
        let response = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(storage_key.to_string()),
            other => StorageError::ReadFailed(other.to_string()),
        })?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;

        tracing::debug!(
            key = %storage_key,
            size_bytes = bytes.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 read successful"
        );

        Ok(bytes)
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let location = Self::location(storage_key)?;
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let location = Self::location(storage_key)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {
                tracing::info!(key = %storage_key, "S3 delete successful");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, key = %storage_key, "S3 delete failed");
                Err(StorageError::DeleteFailed(e.to_string()))
            }
        }
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        let location = Self::location(storage_key)?;
        match self.store.head(&location).await {
            Ok(meta) => Ok(meta.size),
            Err(ObjectStoreError::NotFound { .. }) => {
                Err(StorageError::NotFound(storage_key.to_string()))
            }
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.exists(HEALTH_PROBE_KEY).await.map(|_| ())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
