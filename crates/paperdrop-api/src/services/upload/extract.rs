//! Multipart extraction and validation
//!
//! Nothing here touches the blob store or the queue; every rejection is free of side effects.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use paperdrop_core::models::{display_name, UploadedFile};
use paperdrop_core::DocumentPolicy;

use super::UploadError;

/// MIME essence: parameters stripped, trimmed, lowercased.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// A body cut off by the router's body limit surfaces here as a 413; the caller fills in
/// the policy limit.
fn multipart_error(err: MultipartError) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::PayloadTooLarge { limit: 0 }
    } else {
        UploadError::MalformedMultipart(err.body_text())
    }
}

/// Pull the single file for `policy` out of the body.
///
/// The part's media type is checked before its bytes are read, and the bytes are read
/// chunk by chunk so an oversized file is rejected once it passes `policy.max_bytes`.
#[tracing::instrument(skip(multipart, policy), fields(doc_type = %policy.doc_type))]
pub async fn extract_upload(
    multipart: &mut Multipart,
    policy: &DocumentPolicy,
) -> Result<UploadedFile, UploadError> {
    let with_limit = |err: UploadError| match err {
        UploadError::PayloadTooLarge { .. } => UploadError::PayloadTooLarge {
            limit: policy.max_bytes,
        },
        other => other,
    };

    let mut file: Option<UploadedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| with_limit(multipart_error(e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name != policy.field_name {
            if field.file_name().is_some() {
                return Err(UploadError::MalformedMultipart(format!(
                    "Unexpected file field '{}'; send the file as '{}'",
                    name, policy.field_name
                )));
            }
            tracing::trace!(field = %name, "Ignoring non-file field");
            continue;
        }

        if file.is_some() {
            return Err(UploadError::MalformedMultipart(format!(
                "Multiple '{}' fields; send exactly one file",
                policy.field_name
            )));
        }

        let declared = field.content_type().unwrap_or("").to_string();
        if mime_essence(&declared) != mime_essence(&policy.media_type) {
            return Err(UploadError::InvalidMediaType {
                expected: policy.media_type.clone(),
                actual: if declared.is_empty() {
                    "none".to_string()
                } else {
                    declared
                },
            });
        }

        let original_name = display_name(field.file_name().unwrap_or(""));
        let content = read_bounded(field, policy.max_bytes)
            .await
            .map_err(with_limit)?;

        file = Some(UploadedFile {
            original_name,
            media_type: mime_essence(&declared),
            content,
        });
    }

    let file = file.ok_or_else(|| UploadError::MissingFile {
        field: policy.field_name.clone(),
    })?;

    if file.content.is_empty() {
        return Err(UploadError::EmptyFile);
    }

    tracing::debug!(
        original_name = %file.original_name,
        size_bytes = file.size_bytes(),
        "Upload extracted"
    );
    Ok(file)
}

async fn read_bounded(mut field: Field<'_>, max_bytes: usize) -> Result<Vec<u8>, UploadError> {
    let mut content = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if content.len() + chunk.len() > max_bytes {
            tracing::debug!(
                received = content.len() + chunk.len(),
                max_bytes,
                "Upload exceeds limit, aborting read"
            );
            return Err(UploadError::PayloadTooLarge { limit: max_bytes });
        }
        content.extend_from_slice(&chunk);
    }
    Ok(content)
}
