use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Server-generated identifier of a stored blob.
///
/// UUIDv7: a millisecond timestamp followed by random bits, so ids generated concurrently
/// on different requests (or hosts) do not collide and sort by creation time. The textual
/// form is hyphenated lowercase hex, safe as a path component on every filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct BlobId(Uuid);

impl BlobId {
    pub fn generate() -> Self {
        BlobId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for BlobId {
    fn from(id: Uuid) -> Self {
        BlobId(id)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// A blob whose bytes are durably committed to the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoredBlob {
    pub blob_id: BlobId,
    /// Location inside the blob store, derived from the blob id only.
    pub storage_key: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
}
