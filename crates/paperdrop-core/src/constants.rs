//! Application-wide constants.

/// Queue name used by the original upload service; kept so existing consumers keep working.
pub const DEFAULT_QUEUE_NAME: &str = "file-upload";

/// Default document type served at `POST /uploads/pdf`.
pub const DEFAULT_DOC_TYPE: &str = "pdf";

/// Multipart field carrying the file for the default document type.
pub const DEFAULT_UPLOAD_FIELD: &str = "pdf";

/// The only media type accepted for the default document type.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// 2 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;

/// Slack added on top of the file limit for multipart boundaries and part headers
/// when sizing the HTTP body limit.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Leading bytes of every PDF file.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Upper bound on the delay before a nacked job is redelivered.
pub const MAX_REDELIVERY_BACKOFF_SECS: u64 = 300;
