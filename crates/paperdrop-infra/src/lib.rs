//! Paperdrop Infrastructure Library
//!
//! Shared pieces used by the API server and the worker:
//! - Middleware (request ID, security headers)
//! - Telemetry initialization (tracing subscriber)
//! - Shutdown signal handling

#[cfg(feature = "middleware")]
pub mod middleware;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod shutdown;

// Re-export commonly used types
#[cfg(feature = "middleware")]
pub use middleware::{
    get_request_id, request_id_middleware, security_headers_middleware, RequestId,
};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

pub use shutdown::{wait_for_shutdown, ShutdownReason};
