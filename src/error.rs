//! Server Error Types

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised by the echo listener and its connection handlers
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be created (port in use, permission denied).
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A read or write failed on a single client connection.
    #[error("connection {id} failed: {source}")]
    Connection {
        id: String,
        #[source]
        source: io::Error,
    },

    /// The manager has already bound, and its listener has been taken by the accept loop.
    #[error("listener for {addr} was already bound")]
    AlreadyBound { addr: SocketAddr },

    /// The accept loop was started without a bound listener.
    #[error("listener not bound")]
    ListenerNotBound,
}

impl ServerError {
    /// Whether a connection failure is the peer going away rather than a local fault
    pub fn is_peer_disconnect(&self) -> bool {
        match self {
            ServerError::Connection { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
