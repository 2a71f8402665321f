//! Echo Module
//!
//! Per-connection byte echo and session tracking.

pub mod engine;
pub mod session;

pub use engine::echo_stream;
pub use session::{ConnectionState, EchoSession, SessionStats};
