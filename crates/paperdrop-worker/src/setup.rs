use anyhow::{Context, Result};
use paperdrop_core::{Config, QueueBackend};
use paperdrop_db::{setup_database, CompletionRepository};
use sqlx::PgPool;
use std::sync::Arc;

use crate::completion::{CompletionStore, MemoryCompletionStore, PgCompletionStore};
use crate::queue::{JobQueue, MemoryJobQueue, PgJobQueue, QueueSettings};

/// Queue plus the completion store that matches its durability.
pub struct QueueComponents {
    pub queue: Arc<dyn JobQueue>,
    pub completions: Arc<dyn CompletionStore>,
    /// Present for the Postgres backend.
    pub pool: Option<PgPool>,
}

impl QueueComponents {
    pub fn is_durable(&self) -> bool {
        self.pool.is_some()
    }
}

pub async fn create_queue_components(config: &Config) -> Result<QueueComponents> {
    let settings = QueueSettings::from_config(config);

    match config.queue.backend {
        QueueBackend::Postgres => {
            let url = config
                .queue
                .url
                .as_deref()
                .context("QUEUE_URL (or DATABASE_URL) is required for the postgres queue")?;
            let pool = setup_database(
                url,
                config.queue.db_max_connections,
                config.queue.db_timeout_secs,
            )
            .await
            .context("Failed to set up queue database")?;

            let queue = PgJobQueue::new(pool.clone(), settings);
            let _listener = queue.listen();

            tracing::info!(queue = %config.queue.name, "Using PostgreSQL job queue");
            Ok(QueueComponents {
                queue: Arc::new(queue),
                completions: Arc::new(PgCompletionStore::new(CompletionRepository::new(
                    pool.clone(),
                ))),
                pool: Some(pool),
            })
        }
        QueueBackend::Memory => {
            tracing::warn!(
                queue = %config.queue.name,
                "Using in-memory job queue; jobs are lost on restart"
            );
            Ok(QueueComponents {
                queue: Arc::new(MemoryJobQueue::new(settings)),
                completions: Arc::new(MemoryCompletionStore::new()),
                pool: None,
            })
        }
    }
}
