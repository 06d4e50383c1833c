use crate::error::{ErrorResponse, HttpAppError};
use crate::services::upload::extract_upload;
use crate::state::AppState;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    Json,
};
use paperdrop_core::models::UploadAccepted;
use paperdrop_core::AppError;
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/uploads/{doc_type}",
    tag = "uploads",
    params(
        ("doc_type" = String, Path, description = "Configured document type, e.g. 'pdf'")
    ),
    request_body(content = inline(Object), content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored and job enqueued", body = UploadAccepted),
        (status = 400, description = "Missing, empty or malformed file part", body = ErrorResponse),
        (status = 404, description = "Unknown document type", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 415, description = "Wrong media type", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse),
        (status = 503, description = "File stored but job not confirmed; retry later", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    Path(doc_type): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadAccepted>, HttpAppError> {
    let policy = state
        .config
        .policy(&doc_type)
        .cloned()
        .ok_or_else(|| AppError::UnsupportedDocumentType(doc_type.clone()))?;

    let mut multipart = multipart?;
    let file = extract_upload(&mut multipart, &policy).await?;
    // Body fully consumed; from here the work is detached from the request.
    drop(multipart);

    let accepted = state.uploads.run_detached(policy, file).await?;
    Ok(Json(accepted))
}
