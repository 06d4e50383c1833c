//! Error types module
//!
//! `AppError` is the error every crate converts into at the HTTP boundary. Each variant
//! describes its own response through [`ErrorMetadata`].

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors such as rejected uploads
    Debug,
    /// Transient conditions the caller can retry
    Warn,
    /// Unexpected failures
    Error,
}

/// Metadata for error responses; lets an error describe its own HTTP representation.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "INVALID_MEDIA_TYPE")
    fn error_code(&self) -> &'static str;

    /// Whether the same request may succeed if retried
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid media type: {0}")]
    InvalidMediaType(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Missing file: {0}")]
    MissingFile(String),

    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),

    #[error("Empty file")]
    EmptyFile,

    #[error("Unsupported document type: {0}")]
    UnsupportedDocumentType(String),

    /// The blob is stored but its job could not be confirmed on the queue.
    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InvalidMediaType(_) => (
            415,
            "INVALID_MEDIA_TYPE",
            false,
            Some("Upload a file with the accepted content type"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Reduce file size below the upload limit"),
            false,
            LogLevel::Debug,
        ),
        AppError::MissingFile(_) => (
            400,
            "MISSING_FILE",
            false,
            Some("Send the file in the expected multipart field"),
            false,
            LogLevel::Debug,
        ),
        AppError::MalformedMultipart(_) => (
            400,
            "MALFORMED_MULTIPART",
            false,
            Some("Send a multipart/form-data body with exactly one file"),
            false,
            LogLevel::Debug,
        ),
        AppError::EmptyFile => (
            400,
            "EMPTY_FILE",
            false,
            Some("Upload a non-empty file"),
            false,
            LogLevel::Debug,
        ),
        AppError::UnsupportedDocumentType(_) => (
            404,
            "UNSUPPORTED_DOCUMENT_TYPE",
            false,
            Some("Check the document type in the upload URL"),
            false,
            LogLevel::Debug,
        ),
        AppError::EnqueueFailed(_) => (
            503,
            "ENQUEUE_FAILED",
            true,
            Some("Retry the upload after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Storage(_) => "Storage",
            AppError::InvalidMediaType(_) => "InvalidMediaType",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::MissingFile(_) => "MissingFile",
            AppError::MalformedMultipart(_) => "MalformedMultipart",
            AppError::EmptyFile => "EmptyFile",
            AppError::UnsupportedDocumentType(_) => "UnsupportedDocumentType",
            AppError::EnqueueFailed(_) => "EnqueueFailed",
            AppError::Internal(_) => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Storage(_) => "Failed to store file".to_string(),
            AppError::InvalidMediaType(ref msg) => msg.clone(),
            AppError::PayloadTooLarge(ref msg) => msg.clone(),
            AppError::MissingFile(ref msg) => msg.clone(),
            AppError::MalformedMultipart(ref msg) => msg.clone(),
            AppError::EmptyFile => "Uploaded file is empty".to_string(),
            AppError::UnsupportedDocumentType(ref doc_type) => {
                format!("Unsupported document type: {}", doc_type)
            }
            AppError::EnqueueFailed(_) => {
                "File was stored but could not be queued for processing".to_string()
            }
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_storage() {
        let err = AppError::Storage("disk full at /srv/uploads".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to store file");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_validation_errors_are_permanent_4xx() {
        let errors = [
            AppError::InvalidMediaType("text/plain".to_string()),
            AppError::PayloadTooLarge("3145728 bytes".to_string()),
            AppError::MissingFile("pdf".to_string()),
            AppError::MalformedMultipart("two files".to_string()),
            AppError::EmptyFile,
            AppError::UnsupportedDocumentType("docx".to_string()),
        ];
        for err in errors {
            let status = err.http_status_code();
            assert!((400..500).contains(&status), "{} -> {}", err, status);
            assert!(!err.is_recoverable());
            assert!(!err.is_sensitive());
            assert_eq!(err.log_level(), LogLevel::Debug);
        }
    }

    #[test]
    fn test_specific_validation_status_codes() {
        assert_eq!(
            AppError::InvalidMediaType(String::new()).http_status_code(),
            415
        );
        assert_eq!(
            AppError::PayloadTooLarge(String::new()).http_status_code(),
            413
        );
        assert_eq!(
            AppError::UnsupportedDocumentType("docx".to_string()).client_message(),
            "Unsupported document type: docx"
        );
    }

    #[test]
    fn test_enqueue_failed_is_transient() {
        let err = AppError::EnqueueFailed("timed out after 3 attempts".to_string());
        assert_eq!(err.http_status_code(), 503);
        assert_eq!(err.error_code(), "ENQUEUE_FAILED");
        assert!(err.is_recoverable());
        assert!(!err.client_message().contains("timed out"));
    }

    #[test]
    fn test_internal_error_hides_message() {
        let err = AppError::Internal("upload task panicked".to_string());
        assert_eq!(err.error_type(), "Internal");
        assert_eq!(err.client_message(), "Internal server error");
        assert_eq!(err.detailed_message(), "Internal error: upload task panicked");
    }
}
