//! Graceful shutdown for background tasks.
//!
//! Tasks receive a [`ShutdownSignal`] and finish their current unit of work
//! before returning; the coordinator waits for them up to a timeout.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Shutdown coordinator for graceful termination
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Tracked background tasks
    tasks: JoinSet<()>,
}

impl ShutdownCoordinator {
    /// Creates a new shutdown coordinator
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            tasks: JoinSet::new(),
        }
    }

    /// Gets a shutdown receiver
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.shutdown_tx.subscribe(),
        }
    }

    /// Spawns a task that watches its own [`ShutdownSignal`].
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            future.await;
            info!(task = name, "Background task stopped");
        });
    }

    /// Signals every task and waits for them, aborting stragglers after `timeout`.
    pub async fn shutdown(mut self, timeout: Duration) {
        info!("Initiating graceful shutdown");

        let _ = self.shutdown_tx.send(());

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Task failed during shutdown");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout reached, aborting remaining tasks");
            self.tasks.abort_all();
        }

        info!("Shutdown complete");
    }

    /// Returns the number of active tasks
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shutdown signal receiver
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
}

impl ShutdownSignal {
    /// Waits for shutdown signal. Also returns if the coordinator is gone.
    pub async fn recv(&mut self) {
        let _ = self.receiver.recv().await;
    }

    /// Checks if shutdown has been signaled (non-blocking)
    pub fn is_shutdown(&mut self) -> bool {
        self.receiver.try_recv().is_ok()
    }
}

/// Waits for SIGTERM or SIGINT
///
/// # Errors
///
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, initiating shutdown");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating shutdown");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_shutdown() {
        let mut coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.subscribe();

        coordinator.spawn("waiter", async move {
            signal.recv().await;
        });
        assert_eq!(coordinator.task_count(), 1);

        tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.shutdown(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_is_shutdown_non_blocking() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.subscribe();

        assert!(!signal.is_shutdown());
        coordinator.shutdown(Duration::from_millis(10)).await;
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_stuck_task_is_aborted() {
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.spawn("stuck", std::future::pending::<()>());

        tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.shutdown(Duration::from_millis(20)),
        )
        .await
        .unwrap();
    }
}
