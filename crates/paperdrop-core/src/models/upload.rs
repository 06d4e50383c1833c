use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::blob::BlobId;

const MAX_DISPLAY_NAME_LENGTH: usize = 255;

/// A file received on the upload endpoint, fully read and validated, not yet stored.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Caller-supplied name, already passed through [`display_name`]. Metadata only.
    pub original_name: String,
    pub media_type: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn size_bytes(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Body returned once the blob is stored and its job is on the queue.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadAccepted {
    /// Always `"ok"`.
    pub status: String,
    pub job_id: Uuid,
    pub blob_id: BlobId,
}

impl UploadAccepted {
    pub fn new(job_id: Uuid, blob_id: BlobId) -> Self {
        Self {
            status: "ok".to_string(),
            job_id,
            blob_id,
        }
    }
}

/// Reduce an untrusted client filename to something safe to log and show.
///
/// Only the last path segment is kept, control characters are dropped and the result is
/// capped at 255 characters. The output is never used to build a storage path.
pub fn display_name(raw: &str) -> String {
    let last_segment = raw
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(raw);

    let cleaned: String = last_segment
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_DISPLAY_NAME_LENGTH)
        .collect();

    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}
