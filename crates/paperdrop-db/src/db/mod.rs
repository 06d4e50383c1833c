//! Database repositories for data access layer
//
// Queue table access (enqueue, claim, ack, nack, dead letters)
pub mod job;
//
// Worker completion markers
pub mod completion;
//
// Pool construction and migrations
pub mod pool;

pub use completion::CompletionRepository;
pub use job::{JobRepository, JobRow};
pub use pool::setup_database;
