use anyhow::{Context, Result};
use paperdrop_core::Config;
use paperdrop_infra::{init_telemetry, shutdown_telemetry, wait_for_shutdown};
use paperdrop_storage::create_blob_store;
use paperdrop_worker::{
    create_queue_components, DocumentInspector, FileOrphanLedger, Reconciler, WorkerPool,
    WorkerPoolConfig,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    config.validate()?;

    init_telemetry(
        &format!("{}-worker", config.service_name()),
        config.environment(),
        config.is_production(),
    )
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    let components = create_queue_components(&config).await?;
    if !components.is_durable() {
        anyhow::bail!(
            "paperdrop-worker needs a shared queue; QUEUE_BACKEND=memory only works inside the API process"
        );
    }

    let store = create_blob_store(&config.storage)
        .await
        .context("Failed to initialize blob store")?;
    let ledger = Arc::new(
        FileOrphanLedger::new(&config.queue.orphan_ledger_path)
            .await
            .context("Failed to open orphan ledger")?,
    );

    let reconciler = (config.queue.reconcile_interval_secs > 0).then(|| {
        Arc::new(Reconciler::new(
            ledger,
            components.queue.clone(),
            store.clone(),
        ))
        .spawn(Duration::from_secs(config.queue.reconcile_interval_secs))
    });

    let pool = WorkerPool::new(
        components.queue.clone(),
        components.completions.clone(),
        Arc::new(DocumentInspector::new()),
        store,
        WorkerPoolConfig::from(&config.worker),
    )
    .start();

    tracing::info!(
        queue = %config.queue.name,
        storage = %config.storage.backend,
        "Worker ready"
    );

    wait_for_shutdown().await;

    pool.shutdown().await;
    if let Some(reconciler) = reconciler {
        reconciler.shutdown().await;
    }
    components.queue.close().await;
    shutdown_telemetry().await;

    Ok(())
}
