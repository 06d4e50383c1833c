//! Job processing error types
//!
//! Handlers return a [`JobError`] to tell the worker pool whether a failed job should go
//! back on the queue for another delivery or straight to the dead-letter state.

use std::fmt;

/// Failure of a single job delivery.
#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl JobError {
    /// A failure that will not change on redelivery: missing blob, checksum mismatch,
    /// content the handler cannot understand. The job is dead-lettered immediately.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// A transient failure (storage hiccup, timeout). The job is nacked and redelivered
    /// until the queue's delivery limit is reached.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    /// Plain errors are treated as transient.
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}
