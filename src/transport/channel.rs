use std::time::Duration;

use tracing::{debug, trace};

use super::{Transport, TransportError};

/// Wraps a [`Transport`] and applies zero-length termination.
///
/// USB bulk transfers end with a short packet. When a read or write fills its
/// requested length exactly and that length is a multiple of the packet size,
/// the peer follows up with (or expects) an empty packet, which has to be
/// consumed (or sent) before the transfer counts as complete.
pub struct BulkChannel<T> {
    transport: T,
    packet_size: usize,
    read_zlt_pending: bool,
}

impl<T: Transport> BulkChannel<T> {
    pub fn new(transport: T) -> Self {
        let packet_size = transport.max_packet_size();
        Self {
            transport,
            packet_size,
            read_zlt_pending: false,
        }
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn is_packet_aligned(&self, len: usize) -> bool {
        self.packet_size != 0 && len % self.packet_size == 0
    }

    fn fills_transfer(&self, got: usize, expected: usize) -> bool {
        got > 0 && got == expected && self.is_packet_aligned(got)
    }

    /// One read of at most `max_bytes`, without consuming a trailing ZLT.
    pub async fn read_chunk(&mut self, max_bytes: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        let chunk = self.transport.read(max_bytes, timeout).await?;
        if chunk.len() > max_bytes {
            return Err(TransportError::Overrun {
                max: max_bytes,
                received: chunk.len(),
            });
        }
        self.read_zlt_pending = self.fills_transfer(chunk.len(), max_bytes);
        trace!(requested = max_bytes, received = chunk.len(), "bulk read");
        Ok(chunk)
    }

    /// Consumes the zero-length packet owed by the last read, if any.
    pub async fn read_end(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        if !self.read_zlt_pending {
            return Ok(());
        }
        self.read_zlt_pending = false;
        let probe = self.transport.read(self.packet_size, timeout).await?;
        if !probe.is_empty() {
            return Err(TransportError::UnexpectedData(probe.len()));
        }
        debug!("consumed zero-length packet");
        Ok(())
    }

    /// Reads a complete message of at most `max_bytes`, ZLT included.
    pub async fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        let chunk = self.read_chunk(max_bytes, timeout).await?;
        self.read_end(timeout).await?;
        Ok(chunk)
    }

    /// Reads exactly `len` bytes as one message.
    pub async fn read_exact(&mut self, len: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        let data = self.read(len, timeout).await?;
        if data.len() != len {
            return Err(TransportError::ShortRead {
                expected: len,
                received: data.len(),
            });
        }
        Ok(data)
    }

    /// Writes `data` as one message, followed by a ZLT when it is packet aligned.
    pub async fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError> {
        let written = self.transport.write(data, timeout).await?;
        if written != data.len() {
            return Err(TransportError::ShortWrite {
                expected: data.len(),
                written,
            });
        }
        if self.fills_transfer(written, data.len()) {
            let extra = self.transport.write(&[], timeout).await?;
            if extra != 0 {
                return Err(TransportError::ShortWrite { expected: 0, written: extra });
            }
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}
