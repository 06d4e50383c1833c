//! Application setup: build the shared state, router and background tasks from config.

pub mod routes;
pub mod server;

use anyhow::{Context, Result};
use axum::Router;
use paperdrop_core::Config;
use paperdrop_storage::create_blob_store;
use paperdrop_worker::{
    create_queue_components, DocumentInspector, FileOrphanLedger, JobQueue, Reconciler,
    ReconcilerHandle, WorkerPool, WorkerPoolConfig, WorkerPoolHandle,
};
use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

/// Tasks that live as long as the server and must be stopped after it.
pub struct BackgroundTasks {
    queue: Arc<dyn JobQueue>,
    reconciler: Option<ReconcilerHandle>,
    embedded_worker: Option<WorkerPoolHandle>,
}

impl BackgroundTasks {
    pub async fn shutdown(self) {
        if let Some(worker) = self.embedded_worker {
            worker.shutdown().await;
        }
        if let Some(reconciler) = self.reconciler {
            reconciler.shutdown().await;
        }
        self.queue.close().await;
    }
}

/// Wire storage, queue and ledger into an [`AppState`] and build the router.
///
/// The reconciler runs here because the ledger lives on this host. With the in-memory
/// queue nothing outside this process can consume jobs, so a worker pool is embedded too.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, Router, BackgroundTasks)> {
    config.validate().context("Invalid configuration")?;

    let store = create_blob_store(&config.storage)
        .await
        .context("Failed to initialize blob store")?;
    tracing::info!(backend = %store.backend_type(), "Blob store ready");

    let components = create_queue_components(&config).await?;
    let ledger = Arc::new(
        FileOrphanLedger::new(&config.queue.orphan_ledger_path)
            .await
            .context("Failed to open orphan ledger")?,
    );

    let reconciler = (config.queue.reconcile_interval_secs > 0).then(|| {
        Arc::new(Reconciler::new(
            ledger.clone(),
            components.queue.clone(),
            store.clone(),
        ))
        .spawn(Duration::from_secs(config.queue.reconcile_interval_secs))
    });

    let embedded_worker = (!components.is_durable()).then(|| {
        tracing::info!("Starting embedded worker pool for in-memory queue");
        WorkerPool::new(
            components.queue.clone(),
            components.completions.clone(),
            Arc::new(DocumentInspector::new()),
            store.clone(),
            WorkerPoolConfig::from(&config.worker),
        )
        .start()
    });

    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        components.queue.clone(),
        ledger,
    ));
    let router = routes::setup_routes(&config, state.clone())?;

    let background = BackgroundTasks {
        queue: components.queue,
        reconciler,
        embedded_worker,
    };

    Ok((state, router, background))
}
