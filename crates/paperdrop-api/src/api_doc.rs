//! OpenAPI documentation, served at `/api/openapi.json`.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use crate::setup::routes::health;
use paperdrop_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Paperdrop API",
        version = "0.1.0",
        description = "Accepts a single document upload, stores it durably and queues a job referencing it for asynchronous processing."
    ),
    paths(
        handlers::upload::upload_document,
        health::liveness_check,
        health::readiness_check,
    ),
    components(schemas(
        models::UploadAccepted,
        models::BlobId,
        error::ErrorResponse,
        health::ReadinessResponse,
    )),
    tags(
        (name = "uploads", description = "Document upload"),
        (name = "health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;
