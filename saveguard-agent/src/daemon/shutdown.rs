//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! The coordinator owns a [`CancellationToken`]. A signal cancels it, and so
//! does [`ShutdownCoordinator::trigger`], so tasks only ever wait on the token.

use std::io;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shutdown coordinator
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled once shutdown begins
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutdown without a signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Wait for SIGINT, SIGTERM or [`trigger`](Self::trigger), then cancel the token.
    ///
    /// Fails only if a signal handler cannot be installed.
    pub async fn wait_for_signal(&self) -> io::Result<()> {
        #[cfg(unix)]
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        #[cfg(unix)]
        let terminate = async move {
            terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.token.cancelled() => {
                info!("Shutdown requested");
            }
        }

        self.token.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_cancels_every_token() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });

        coordinator.trigger();

        handle.await.unwrap();
        assert!(coordinator.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_returns_after_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = coordinator.clone();

        let handle = tokio::spawn(async move { waiter.wait_for_signal().await });
        coordinator.trigger();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
