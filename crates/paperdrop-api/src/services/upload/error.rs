use paperdrop_core::AppError;
use paperdrop_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Why an upload was not accepted.
///
/// Everything up to `EmptyFile` is a permanent rejection raised before any side effect.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Expected {expected}, got {actual}")]
    InvalidMediaType { expected: String, actual: String },

    #[error("File exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("No file in multipart field '{field}'")]
    MissingFile { field: String },

    #[error("{0}")]
    MalformedMultipart(String),

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("Failed to store blob: {0}")]
    Storage(#[from] StorageError),

    /// The blob is durable but the job could not be confirmed on the queue.
    #[error("Job {job_id} not confirmed after {attempts} enqueue attempts: {reason}")]
    EnqueueFailed {
        job_id: Uuid,
        attempts: u32,
        reason: String,
    },

    #[error("Upload task failed: {0}")]
    Aborted(String),
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            e @ UploadError::InvalidMediaType { .. } => AppError::InvalidMediaType(e.to_string()),
            e @ UploadError::PayloadTooLarge { .. } => AppError::PayloadTooLarge(e.to_string()),
            e @ UploadError::MissingFile { .. } => AppError::MissingFile(e.to_string()),
            UploadError::MalformedMultipart(msg) => AppError::MalformedMultipart(msg),
            UploadError::EmptyFile => AppError::EmptyFile,
            UploadError::Storage(e) => AppError::Storage(e.to_string()),
            e @ UploadError::EnqueueFailed { .. } => AppError::EnqueueFailed(e.to_string()),
            UploadError::Aborted(msg) => AppError::Internal(msg),
        }
    }
}
