//! Shutdown Handling
//!
//! Waits for SIGTERM/SIGINT and drives the connection manager through a
//! bounded shutdown: stop accepting, close the listener, close in-flight
//! connections, then wait for their tasks to finish.

use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::connection::ConnectionManager;
use crate::Result;

/// Shutdown coordinator that manages the shutdown process
pub struct ShutdownCoordinator {
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating shutdown");
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

    /// Shut the connection manager down, waiting at most the configured timeout
    /// for its connections to close. Returns true if all of them did.
    pub async fn shutdown_connection_manager(&self, connection_manager: &ConnectionManager) -> bool {
        connection_manager.initiate_shutdown();
        connection_manager
            .wait_for_connections_to_close_within(self.timeout)
            .await
    }
}
