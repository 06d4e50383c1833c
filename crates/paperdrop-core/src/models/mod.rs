pub mod blob;
pub mod job;
pub mod upload;

pub use blob::{BlobId, StoredBlob};
pub use job::{
    redelivery_delay, AckHandle, DeadLetter, Delivery, JobCompletion, JobDescriptor, JobStatus,
    NackOutcome, QueueStats,
};
pub use upload::{display_name, UploadAccepted, UploadedFile};
