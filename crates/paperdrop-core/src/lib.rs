//! Paperdrop Core Library
//!
//! Domain models, error types, and configuration shared by the upload receiver,
//! the blob store, the job queue, and the workers.

pub mod config;
pub mod constants;
pub mod error;
pub mod job_error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{Config, DocumentPolicy, QueueBackend};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use job_error::JobError;
pub use storage_types::StorageBackend;
