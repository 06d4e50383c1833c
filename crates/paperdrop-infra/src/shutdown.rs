//! Process stop signals shared by the API server and the worker.

use std::fmt;

/// Which signal asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM.
///
/// # Panics
/// If a signal handler cannot be installed.
pub async fn wait_for_shutdown() -> ShutdownReason {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        ShutdownReason::Interrupt
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        sigterm.recv().await;
        ShutdownReason::Terminate
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<ShutdownReason>();

    let reason = tokio::select! {
        reason = interrupt => reason,
        reason = terminate => reason,
    };

    tracing::info!(signal = %reason, "Shutdown requested, draining");
    reason
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_names_the_signal() {
        assert_eq!(ShutdownReason::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownReason::Terminate.to_string(), "SIGTERM");
    }
}
