//! Upload pipeline: extract and validate the multipart body, then persist and enqueue.

mod error;
mod extract;
mod persist;

pub use error::UploadError;
pub use extract::{extract_upload, mime_essence};
pub use persist::{EnqueueRetry, UploadPipeline};
