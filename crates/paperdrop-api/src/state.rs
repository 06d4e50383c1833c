//! Application state shared by every request.

use paperdrop_core::Config;
use paperdrop_storage::BlobStore;
use paperdrop_worker::{JobQueue, OrphanLedger};
use std::sync::Arc;

use crate::services::upload::{EnqueueRetry, UploadPipeline};

/// Read-only config plus the process-wide store, queue and ledger handles.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub ledger: Arc<dyn OrphanLedger>,
    pub uploads: UploadPipeline,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn BlobStore>,
        queue: Arc<dyn JobQueue>,
        ledger: Arc<dyn OrphanLedger>,
    ) -> Self {
        let uploads = UploadPipeline::new(
            store.clone(),
            queue.clone(),
            ledger.clone(),
            EnqueueRetry::from_config(&config),
        );
        Self {
            config,
            store,
            queue,
            ledger,
            uploads,
        }
    }
}
