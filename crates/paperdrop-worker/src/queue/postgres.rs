use async_trait::async_trait;
use paperdrop_core::models::{
    AckHandle, DeadLetter, Delivery, JobDescriptor, NackOutcome, QueueStats,
};
use paperdrop_db::db::job::NEW_JOB_CHANNEL;
use paperdrop_db::JobRepository;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{JobQueue, QueueError, QueueResult, QueueSettings};

/// Pause before reconnecting the LISTEN connection after any failure.
const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(5);

fn listen_retry_delay(pool: &PgPool) -> Option<Duration> {
    (!pool.is_closed()).then_some(LISTEN_RETRY_DELAY)
}

/// Durable queue backed by the `jobs` table.
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so any number of worker processes can consume the
/// same queue. New jobs are announced with `pg_notify`; see [`PgJobQueue::listen`].
pub struct PgJobQueue {
    repository: JobRepository,
    pool: PgPool,
    settings: QueueSettings,
    notify: Arc<Notify>,
    closed: AtomicBool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, settings: QueueSettings) -> Self {
        Self {
            repository: JobRepository::new(pool.clone()),
            pool,
            settings,
            notify: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Spawn a LISTEN task that wakes idle consumers when a job is enqueued.
    ///
    /// Consumers still poll, so a dropped listener connection only costs latency. The task
    /// ends once the pool is closed.
    pub fn listen(&self) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let notify = self.notify.clone();
        let queue_name = self.settings.name.clone();

        tokio::spawn(async move {
            loop {
                match PgListener::connect_with(&pool).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(NEW_JOB_CHANNEL).await {
                            tracing::warn!(error = %e, "LISTEN failed, will retry");
                        } else {
                            Self::forward_notifications(&mut listener, &queue_name, &notify)
                                .await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "PgListener connect failed, will retry");
                    }
                }

                match listen_retry_delay(&pool) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => break,
                }
            }
            tracing::debug!("Queue listener stopped");
        })
    }

    /// Relay notifications for this queue until the listener errors.
    ///
    /// `recv` reconnects on its own after a dropped connection, so an error here means the
    /// reconnect failed or the pool closed.
    async fn forward_notifications(listener: &mut PgListener, queue_name: &str, notify: &Notify) {
        loop {
            match listener.recv().await {
                Ok(notification) => {
                    if notification.payload() == queue_name {
                        notify.notify_waiters();
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "PgListener receive failed, will reconnect");
                    return;
                }
            }
        }
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

fn unavailable(err: anyhow::Error) -> QueueError {
    QueueError::Unavailable(format!("{:#}", err))
}

#[async_trait]
impl JobQueue for PgJobQueue {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.job_id))]
    async fn enqueue(&self, job: &JobDescriptor) -> QueueResult<()> {
        self.ensure_open()?;
        self.repository
            .insert_job(&self.settings.name, job)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<Delivery>> {
        self.ensure_open()?;
        let row = self
            .repository
            .claim_next(
                &self.settings.name,
                self.settings.visibility_timeout,
                self.settings.max_deliveries,
            )
            .await
            .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let lease_id = row.lease_id.ok_or_else(|| {
            QueueError::Backend(anyhow::anyhow!("Claimed job {} has no lease", row.id))
        })?;

        Ok(Some(Delivery {
            handle: AckHandle {
                job_id: row.id,
                lease_id,
                attempt: row.attempts(),
            },
            descriptor: row.payload.0,
        }))
    }

    async fn ack(&self, handle: &AckHandle) -> QueueResult<bool> {
        self.repository
            .ack(handle.job_id, handle.lease_id)
            .await
            .map_err(unavailable)
    }

    async fn nack(
        &self,
        handle: &AckHandle,
        error: &str,
        permanent: bool,
    ) -> QueueResult<NackOutcome> {
        self.repository
            .nack(
                handle.job_id,
                handle.lease_id,
                error,
                permanent,
                self.settings.max_deliveries,
            )
            .await
            .map_err(unavailable)
    }

    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        self.repository
            .dead_letters(&self.settings.name, limit.min(i64::MAX as usize) as i64)
            .await
            .map_err(unavailable)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        self.repository
            .stats(&self.settings.name)
            .await
            .map_err(unavailable)
    }

    async fn health_check(&self) -> QueueResult<()> {
        self.ensure_open()?;
        self.repository.ping().await.map_err(unavailable)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(queue = %self.settings.name, "Closing job queue");
            self.notify.notify_waiters();
            self.repository.close().await;
        }
    }

    fn name(&self) -> &str {
        &self.settings.name
    }

    fn visibility_timeout(&self) -> Option<Duration> {
        Some(self.settings.visibility_timeout)
    }

    fn wakeup(&self) -> Option<Arc<Notify>> {
        Some(self.notify.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn listener_backs_off_until_pool_closes() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://paperdrop@127.0.0.1:1/paperdrop")
            .unwrap();
        assert_eq!(listen_retry_delay(&pool), Some(LISTEN_RETRY_DELAY));

        pool.close().await;
        assert_eq!(listen_retry_delay(&pool), None);
    }
}
