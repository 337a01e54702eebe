use std::sync::Arc;

use tokio::{signal, sync::watch};

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from inside the process
    Requested,
}

/// Fans one shutdown signal out to every waiter, including waiters that start
/// after the signal arrived.
#[derive(Clone)]
pub struct GracefulShutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Start shutdown. Only the first reason is kept.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        let changed = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if changed {
            tracing::info!(?reason, "Shutdown initiated");
        } else {
            tracing::debug!(?reason, "Shutdown already initiated, ignoring signal");
        }
    }

    /// Listen for SIGINT and SIGTERM until one arrives.
    pub async fn run_signal_handler(&self) {
        tracing::debug!("Signal handler started, listening for SIGINT and SIGTERM");
        let reason = tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl+C: {e}");
                    std::future::pending::<()>().await;
                }
                ShutdownReason::Interrupt
            }
            _ = wait_for_sigterm() => ShutdownReason::Terminate,
        };
        self.trigger_shutdown(reason);
    }

    /// Resolve once shutdown has been initiated.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Requested),
            // Sender lives in self, so this is unreachable in practice
            Err(_) => ShutdownReason::Requested,
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
