//! Echo Session

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::ServerError;

/// Lifecycle of a single client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Echoing,
    Closed,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Accepted => 0,
            ConnectionState::Echoing => 1,
            ConnectionState::Closed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Accepted,
            1 => ConnectionState::Echoing,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::Echoing => "echoing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Represents one accepted client connection
#[derive(Debug)]
pub struct EchoSession {
    pub session_id: String,
    pub peer_addr: SocketAddr,
    pub start_time: Instant,
    state: AtomicU8,
    bytes_echoed: AtomicU64,
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: String,
    pub peer_addr: SocketAddr,
    pub duration_ms: u64,
    pub bytes_echoed: u64,
    pub state: ConnectionState,
}

impl EchoSession {
    /// Create a new session in the `Accepted` state
    pub fn new(session_id: String, peer_addr: SocketAddr) -> Self {
        debug!("Creating echo session {} for {}", session_id, peer_addr);

        Self {
            session_id,
            peer_addr,
            start_time: Instant::now(),
            state: AtomicU8::new(ConnectionState::Accepted.as_u8()),
            bytes_echoed: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move the session forward. `Closed` is terminal and a session never
    /// moves backwards.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if next.as_u8() <= current {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark the session closed
    pub fn close(&self) {
        if self.transition(ConnectionState::Closed) {
            debug!("Session {} closed", self.session_id);
        }
    }

    pub fn bytes_echoed(&self) -> u64 {
        self.bytes_echoed.load(Ordering::Relaxed)
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_echoed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Wrap an I/O failure on this connection
    pub fn connection_error(&self, source: io::Error) -> ServerError {
        ServerError::Connection {
            id: self.session_id.clone(),
            source,
        }
    }

    pub fn to_stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            peer_addr: self.peer_addr,
            duration_ms: self.duration().as_millis() as u64,
            bytes_echoed: self.bytes_echoed(),
            state: self.state(),
        }
    }

    /// Log the session summary and hand it back to the caller
    pub fn log_stats(&self) -> SessionStats {
        let stats = self.to_stats();
        info!(
            session_id = %stats.session_id,
            peer_addr = %stats.peer_addr,
            duration_ms = stats.duration_ms,
            bytes_echoed = stats.bytes_echoed,
            state = %stats.state,
            "Echo session finished"
        );
        stats
    }
}
