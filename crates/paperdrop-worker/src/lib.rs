//! Paperdrop worker
//!
//! Durable job queue backends, the worker pool that consumes them, and the reconciler
//! that re-enqueues blobs whose job never made it onto the queue.

pub mod completion;
pub mod handler;
pub mod ledger;
pub mod pool;
pub mod queue;
pub mod reconcile;
pub mod setup;

pub use completion::{CompletionStore, MemoryCompletionStore, PgCompletionStore};
pub use handler::{DocumentInspector, JobHandler};
pub use ledger::{FileOrphanLedger, LedgerError, OrphanLedger, OrphanRecord};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
pub use queue::{JobQueue, MemoryJobQueue, PgJobQueue, QueueError, QueueResult, QueueSettings};
pub use reconcile::{Reconciler, ReconcilerHandle, SweepReport};
pub use setup::{create_queue_components, QueueComponents};
