//! Paperdrop upload receiver
//!
//! `POST /uploads/{doc_type}` accepts one file, stores it in the blob store and enqueues a
//! job referencing it. The response is sent only after both have succeeded.

pub mod api_doc;
pub mod error;
pub mod handlers;
pub mod services;
pub mod setup;
pub mod state;
