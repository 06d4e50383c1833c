//! Test helpers: build the router over a temp-dir blob store and an in-memory queue.
//!
//! Run from workspace root: `cargo test -p paperdrop-api`.

#![allow(dead_code)]

pub mod doubles;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use paperdrop_api::setup::routes;
use paperdrop_api::state::AppState;
use paperdrop_core::{Config, QueueBackend};
use paperdrop_storage::{BlobStore, LocalStorage};
use paperdrop_worker::{FileOrphanLedger, JobQueue, MemoryJobQueue, OrphanLedger, QueueSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestApp {
    pub server: TestServer,
    pub queue: Arc<MemoryJobQueue>,
    pub ledger: Arc<FileOrphanLedger>,
    pub storage_dir: PathBuf,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub fn blob_count(&self) -> usize {
        count_files(&self.storage_dir)
    }
}

/// Config for tests: in-memory queue, tight enqueue timeouts, no background reconciler.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.queue.backend = QueueBackend::Memory;
    config.queue.url = None;
    config.queue.enqueue_timeout_ms = 50;
    config.queue.enqueue_max_attempts = 3;
    config.queue.enqueue_backoff_ms = 5;
    config.queue.reconcile_interval_secs = 0;
    config.storage.local_path = root.join("blobs").to_string_lossy().into_owned();
    config.queue.orphan_ledger_path = root.join("orphans").to_string_lossy().into_owned();
    config.worker.poll_interval_ms = 10;
    config
}

/// Test app with a real local store and in-memory queue.
pub async fn setup_test_app() -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = test_config(temp_dir.path());
    let store: Arc<dyn BlobStore> = Arc::new(
        LocalStorage::new(&config.storage.local_path)
            .await
            .expect("Failed to create local storage"),
    );
    setup_test_app_with(temp_dir, config, store, None).await
}

/// Test app with injected store and/or queue. When `queue` is `None` a fresh
/// [`MemoryJobQueue`] is used and exposed on the returned [`TestApp`].
pub async fn setup_test_app_with(
    temp_dir: TempDir,
    config: Config,
    store: Arc<dyn BlobStore>,
    queue: Option<Arc<dyn JobQueue>>,
) -> TestApp {
    setup_test_app_with_ledger(temp_dir, config, store, queue, None).await
}

/// Like [`setup_test_app_with`], but the app records orphans in `ledger` when given one.
/// The file ledger on [`TestApp`] is then left untouched.
pub async fn setup_test_app_with_ledger(
    temp_dir: TempDir,
    config: Config,
    store: Arc<dyn BlobStore>,
    queue: Option<Arc<dyn JobQueue>>,
    ledger: Option<Arc<dyn OrphanLedger>>,
) -> TestApp {
    let memory_queue = Arc::new(MemoryJobQueue::new(QueueSettings::from_config(&config)));
    let queue: Arc<dyn JobQueue> = queue.unwrap_or_else(|| memory_queue.clone());

    let file_ledger = Arc::new(
        FileOrphanLedger::new(&config.queue.orphan_ledger_path)
            .await
            .expect("Failed to create orphan ledger"),
    );
    let app_ledger: Arc<dyn OrphanLedger> = ledger.unwrap_or_else(|| file_ledger.clone());

    let state = Arc::new(AppState::new(config.clone(), store, queue, app_ledger));
    let router = routes::setup_routes(&config, state).expect("Failed to build routes");
    let server = TestServer::new(router).expect("Failed to start test server");

    TestApp {
        server,
        queue: memory_queue,
        ledger: file_ledger,
        storage_dir: PathBuf::from(&config.storage.local_path),
        _temp_dir: temp_dir,
    }
}

/// Minimal PDF-looking content of exactly `len` bytes.
pub fn pdf_bytes(len: usize) -> Vec<u8> {
    let mut content = b"%PDF-1.7\n".to_vec();
    content.resize(len.max(content.len()), b'x');
    content
}

pub fn file_form(field: &str, file_name: &str, mime: &str, content: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part(
        field.to_string(),
        Part::bytes(content).file_name(file_name).mime_type(mime),
    )
}

pub fn pdf_form(content: Vec<u8>) -> MultipartForm {
    file_form("pdf", "invoice.pdf", "application/pdf", content)
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
