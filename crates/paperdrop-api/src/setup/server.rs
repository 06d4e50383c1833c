//! Server startup and graceful shutdown

use anyhow::Result;
use axum::Router;
use paperdrop_core::Config;
use paperdrop_infra::wait_for_shutdown;

/// Serve until Ctrl+C or SIGTERM, letting in-flight requests finish.
pub async fn start_server(config: &Config, app: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.server_port());
    tracing::info!(addr = %addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let doc_types: Vec<&str> = config.policies.iter().map(|p| p.doc_type.as_str()).collect();
    tracing::info!(
        environment = %config.environment(),
        doc_types = %doc_types.join(","),
        max_upload_bytes = config.max_upload_bytes(),
        queue_backend = ?config.queue.backend,
        storage_backend = %config.storage.backend,
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            wait_for_shutdown().await;
        })
        .await?;

    tracing::info!("HTTP server stopped");

    Ok(())
}
