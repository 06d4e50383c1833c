//! Paperdrop database layer
//!
//! Postgres persistence for the job queue and worker completion markers.

pub mod db;

pub use db::{setup_database, CompletionRepository, JobRepository, JobRow};
