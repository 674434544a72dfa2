//! Half-duplex bulk transport consumed by the protocol engine.

pub mod channel;
pub mod stream;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use channel::BulkChannel;
pub use stream::PacketStream;

/// Transport failures. All of them end the session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("Short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },

    #[error("Transport returned {received} bytes for a {max}-byte read")]
    Overrun { max: usize, received: usize },

    #[error("Expected a zero-length packet, received {0} bytes")]
    UnexpectedData(usize),

    #[error("Transport closed")]
    Closed,

    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A bulk in/out endpoint pair.
///
/// `read` may return fewer bytes than requested; a short (or empty) result
/// marks the end of a bulk transfer. `None` as timeout waits indefinitely.
#[async_trait]
pub trait Transport: Send {
    async fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError>;

    async fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<usize, TransportError>;

    /// Maximum packet size of the bulk endpoints.
    fn max_packet_size(&self) -> usize;

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
