//! Graceful shutdown handling
//!
//! Waits for SIGTERM/SIGINT, flips a shared flag that axum's graceful
//! shutdown future observes, then closes every cluster connection so open
//! upstream watches terminate.

use crate::kubernetes::ClusterRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

/// Shutdown coordinator for graceful termination
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    is_shutting_down: Arc<AtomicBool>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator with default 30s timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            shutdown_rx,
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Initiate graceful shutdown; repeated calls are no-ops
    pub fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Initiating graceful shutdown...");
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for a termination signal from the OS
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C");
        }

        self.shutdown();
        Ok(())
    }

    /// Future for axum's `with_graceful_shutdown`
    pub fn signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Close every cluster connection, bounded by the coordinator timeout
    pub async fn drain(&self, registry: &ClusterRegistry) {
        info!("Closing cluster connections...");
        match timeout(self.timeout, registry.shutdown_all()).await {
            Ok(()) => info!("Shutdown complete"),
            Err(_) => warn!(
                "Cleanup did not complete within {:?}, forcing exit",
                self.timeout
            ),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::{InMemoryCluster, MemoryConnector};

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new();
        let signal = coordinator.signal();

        assert!(!coordinator.is_shutting_down());
        coordinator.shutdown();
        coordinator.shutdown();

        assert!(coordinator.is_shutting_down());
        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .expect("signal future should resolve");
    }

    #[tokio::test]
    async fn test_drain_closes_connections() {
        let connector = MemoryConnector::new();
        connector.add("https://prod:6443", InMemoryCluster::new());
        let registry = ClusterRegistry::new(Arc::new(connector));
        let config: crate::kubernetes::ClusterConfig = serde_json::from_value(serde_json::json!({
            "name": "prod",
            "endpoint": "https://prod:6443",
            "credential": {"type": "token", "token": "t"}
        }))
        .unwrap();
        registry.register(config).await.unwrap();
        let connection = registry.get("prod").await.unwrap();

        ShutdownCoordinator::new().drain(&registry).await;
        assert!(connection.is_closed());
        assert!(registry.is_empty().await);
    }
}
