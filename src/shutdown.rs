//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is cloned into every source. When SIGINT/SIGTERM
//! arrives (or [`ShutdownSignal::trigger`] is called) each source stops
//! reading new messages; messages already being dispatched run to completion
//! unless the shutdown timeout expires first.
//!
//! # Example
//!
//! ```rust,ignore
//! use webhook_bridge::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let source_shutdown = shutdown.clone();
//!
//! let source = tokio::spawn(async move {
//!     loop {
//!         tokio::select! {
//!             _ = source_shutdown.cancelled() => break,
//!             // ... read and dispatch messages
//!         }
//!     }
//! });
//!
//! shutdown.listen().await;
//! shutdown.drain(source).await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Default shutdown timeout in seconds.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 30;

/// A signal for coordinating graceful shutdown across sources.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,

    /// How long in-flight work may run after shutdown starts
    timeout: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with default timeout (30 seconds).
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    /// Create a new shutdown signal with custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn listen(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.sender.send_replace(true);
    }

    /// Trigger shutdown manually (for testing or programmatic shutdown).
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        self.sender.send_replace(true);
    }

    /// Whether shutdown has started.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once shutdown has started. Safe to call repeatedly.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel can't close under us
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }

    /// Wait for in-flight work to finish, giving up after the timeout.
    ///
    /// Returns `true` if the work completed in time.
    pub async fn drain<F: Future>(&self, work: F) -> bool {
        match tokio::time::timeout(self.timeout, work).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Shutdown timeout reached, abandoning in-flight work"
                );
                false
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal_creation() {
        let signal = ShutdownSignal::new();
        assert_eq!(signal.timeout(), Duration::from_secs(30));
        assert!(!signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let signal = ShutdownSignal::new();

        let trigger_signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger_signal.trigger();
        });

        let result = tokio::time::timeout(Duration::from_millis(500), signal.cancelled()).await;
        assert!(result.is_ok());
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_cancelled_after_trigger_resolves_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let clone = signal.clone();
        let result = tokio::time::timeout(Duration::from_millis(50), clone.cancelled()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_drain_completes() {
        let signal = ShutdownSignal::with_timeout(Duration::from_millis(200));
        assert!(signal.drain(async {}).await);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let signal = ShutdownSignal::with_timeout(Duration::from_millis(20));
        assert!(!signal.drain(std::future::pending::<()>()).await);
    }
}
