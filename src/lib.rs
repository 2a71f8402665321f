//! RustEcho Library
//!
//! A TCP echo server: every byte a client sends is written back to it,
//! unchanged and in order, until the client closes its side of the
//! connection.

pub mod config;
pub mod connection;
pub mod echo;
pub mod error;
pub mod shutdown;

pub use config::Config;
pub use connection::ConnectionManager;
pub use error::ServerError;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the echo server
pub type Result<T> = anyhow::Result<T>;
