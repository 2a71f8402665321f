//! Echo Engine

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::{ConnectionState, EchoSession};
use crate::error::ServerError;

/// Copy every chunk read from `stream` back into it until the peer closes its
/// write side. Returns the number of bytes echoed.
///
/// Reads at most `buffer_size` bytes at a time. The session moves to
/// `Echoing` before the first read; closing it is left to the caller so that
/// error paths and shutdown share one exit.
pub async fn echo_stream<S>(
    stream: &mut S,
    buffer_size: usize,
    session: &EchoSession,
) -> Result<u64, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(buffer_size);
    let mut total = 0u64;

    session.transition(ConnectionState::Echoing);

    loop {
        buffer.clear();
        let n = stream
            .read_buf(&mut buffer)
            .await
            .map_err(|e| session.connection_error(e))?;

        if n == 0 {
            trace!(session_id = %session.session_id, "EOF from peer");
            // Best effort, the peer may already be gone
            if let Err(e) = stream.shutdown().await {
                trace!(session_id = %session.session_id, error = %e, "Write shutdown failed");
            }
            return Ok(total);
        }

        stream
            .write_all(&buffer[..n])
            .await
            .map_err(|e| session.connection_error(e))?;

        total += n as u64;
        session.add_bytes(n as u64);
        trace!(session_id = %session.session_id, bytes = n, "Echoed chunk");
    }
}
