//! Connection Manager Implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::echo::{echo_stream, EchoSession};
use crate::error::ServerError;
use crate::Result;

/// Connection information for tracking
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub addr: SocketAddr,
}

/// Owns the listening socket and spawns one echo task per accepted connection
pub struct ConnectionManager {
    listener: Mutex<Option<TcpListener>>,
    local_addr: OnceLock<SocketAddr>,
    config: Arc<Config>,
    active_connections: Arc<AtomicUsize>,
    connection_tracker: Arc<RwLock<HashMap<String, ConnectionInfo>>>,
    next_connection_id: AtomicUsize,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
            config,
            active_connections: Arc::new(AtomicUsize::new(0)),
            connection_tracker: Arc::new(RwLock::new(HashMap::new())),
            next_connection_id: AtomicUsize::new(1),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Create a manager listening on `port` on all interfaces, defaults otherwise
    pub fn for_port(port: u16) -> Self {
        let mut config = Config::default();
        config.server.bind_addr.set_port(port);
        Self::new(Arc::new(config))
    }

    /// Bind the listening socket. Returns the actual local address, which
    /// differs from the configured one when port 0 was requested.
    ///
    /// A manager binds once: calling this again while the listener is held
    /// returns the same address, and calling it after the accept loop has
    /// taken the listener fails with `ServerError::AlreadyBound`.
    pub async fn bind(&self) -> std::result::Result<SocketAddr, ServerError> {
        let bind_addr = self.config.server.bind_addr;
        let mut slot = self.listener.lock().await;

        if let Some(addr) = self.local_addr.get() {
            if slot.is_some() {
                warn!("Listener already bound to {}", addr);
                return Ok(*addr);
            }
            return Err(ServerError::AlreadyBound { addr: *addr });
        }

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr,
                source,
            })?;

        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr,
            source,
        })?;

        info!("Successfully bound to {}", local_addr);
        // Only ever set here, under the listener lock
        let _ = self.local_addr.set(local_addr);
        *slot = Some(listener);
        Ok(local_addr)
    }

    /// Bind and run the accept loop until shutdown
    pub async fn start(&self) -> Result<()> {
        self.bind().await?;
        self.accept_connections().await?;
        Ok(())
    }

    /// Main connection acceptance loop. The listening socket is closed when
    /// this returns.
    pub async fn accept_connections(&self) -> std::result::Result<(), ServerError> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or(ServerError::ListenerNotBound)?;

        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Acquire) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr).await,
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        drop(listener);
        info!("Connection acceptance loop stopped, listener closed");
        Ok(())
    }

    async fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        // Subscribe before checking the flag so a concurrent shutdown is never missed
        let shutdown_rx = self.shutdown_tx.subscribe();
        if self.shutdown_flag.load(Ordering::Acquire) {
            debug!("Rejecting connection from {} due to shutdown", addr);
            return;
        }

        if self.config.server.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }
        }

        let connection_id = format!(
            "conn_{}",
            self.next_connection_id.fetch_add(1, Ordering::Relaxed)
        );
        debug!("Accepted connection {} from {}", connection_id, addr);

        let conn_info = ConnectionInfo {
            id: connection_id.clone(),
            addr,
        };

        self.active_connections.fetch_add(1, Ordering::AcqRel);
        self.connection_tracker
            .write()
            .await
            .insert(connection_id.clone(), conn_info);

        let session = EchoSession::new(connection_id, addr);
        let buffer_size = self.config.server.buffer_size;
        let active_connections = Arc::clone(&self.active_connections);
        let connection_tracker = Arc::clone(&self.connection_tracker);

        tokio::spawn(async move {
            match Self::handle_connection(stream, &session, buffer_size, shutdown_rx).await {
                Ok(bytes) => {
                    debug!("Connection {} completed, {} bytes echoed", session.session_id, bytes);
                }
                Err(e) if e.is_peer_disconnect() => {
                    debug!("Connection {} dropped by peer: {}", session.session_id, e);
                }
                Err(e) => {
                    warn!("Error handling connection {}: {}", session.session_id, e);
                }
            }

            session.close();
            let stats = session.log_stats();
            debug!(
                "Connection {} closed after {}ms",
                stats.session_id, stats.duration_ms
            );

            connection_tracker.write().await.remove(&session.session_id);
            active_connections.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Echo until EOF, error, or shutdown. The stream is dropped, and so
    /// closed, on return.
    #[instrument(
        skip(stream, session, shutdown_rx),
        fields(connection_id = %session.session_id, addr = %session.peer_addr)
    )]
    async fn handle_connection(
        mut stream: TcpStream,
        session: &EchoSession,
        buffer_size: usize,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> std::result::Result<u64, ServerError> {
        tokio::select! {
            result = echo_stream(&mut stream, buffer_size, session) => result,
            _ = shutdown_rx.recv() => {
                debug!("Connection {} closing for shutdown", session.session_id);
                Ok(session.bytes_echoed())
            }
        }
    }

    /// Get the number of active connections
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Get the bound address, if `bind` has succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Get information about all active connections
    pub async fn active_connection_info(&self) -> Vec<ConnectionInfo> {
        let tracker = self.connection_tracker.read().await;
        tracker.values().cloned().collect()
    }

    /// Get connection statistics
    pub async fn connection_stats(&self) -> ConnectionStats {
        let tracker = self.connection_tracker.read().await;

        ConnectionStats {
            active_connections: tracker.len(),
            total_connections_accepted: self
                .next_connection_id
                .load(Ordering::Relaxed)
                .saturating_sub(1),
        }
    }

    /// Stop accepting and close every open connection
    pub fn initiate_shutdown(&self) {
        if self.shutdown_flag.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Initiating shutdown of connection manager");

        // No receivers just means nothing is running yet
        if self.shutdown_tx.send(()).is_err() {
            debug!("No active receivers for shutdown signal");
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Acquire)
    }

    /// Wait for connection tasks to finish, bounded by the configured shutdown timeout.
    /// Returns true if every connection closed in time.
    pub async fn wait_for_connections_to_close(&self) -> bool {
        self.wait_for_connections_to_close_within(self.config.server.shutdown_timeout)
            .await
    }

    /// Wait at most `limit` for connection tasks to finish
    pub async fn wait_for_connections_to_close_within(&self, limit: Duration) -> bool {
        let start_time = Instant::now();

        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            self.active_connections(),
            limit
        );

        while self.active_connections() > 0 && start_time.elapsed() < limit {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.active_connections();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All connections closed in {:?}", elapsed);
            true
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                elapsed, remaining
            );
            false
        }
    }

    /// Shut the connection manager down
    pub async fn shutdown(&self) -> bool {
        self.initiate_shutdown();
        self.wait_for_connections_to_close().await
    }
}

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub total_connections_accepted: usize,
}
