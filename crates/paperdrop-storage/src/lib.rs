//! Paperdrop Storage Library
//!
//! Durable blob storage for accepted uploads. The [`BlobStore`] trait has a local
//! filesystem implementation and an S3 implementation built on `object_store`.
//!
//! # Storage key format
//!
//! `{doc_type}/{yyyy}/{mm}/{dd}/{blob_id}.{ext}`
//!
//! Keys are derived from server-side values only; the client's filename never appears in
//! a key. Keys must not contain `..`, `\` or a leading `/`. Key generation lives in the
//! `keys` module so all backends stay consistent.

pub mod digest;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_blob_store;
pub use keys::blob_key;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use paperdrop_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{BlobStore, StorageError, StorageResult};
