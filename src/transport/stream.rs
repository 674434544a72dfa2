use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Transport, TransportError};

pub const DEFAULT_PACKET_SIZE: usize = 512;

/// Carries bulk transfers over a byte stream (a TCP bridge, a pipe, an
/// in-memory duplex), one transfer per frame.
///
/// Frame layout: `u32` big-endian length, then that many bytes. A zero-length
/// frame stands in for a USB zero-length packet.
pub struct PacketStream<S> {
    io: S,
    packet_size: usize,
}

impl<S> PacketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S, packet_size: usize) -> Self {
        Self { io, packet_size }
    }

    async fn read_frame(&mut self, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
        let mut len_bytes = [0u8; 4];
        self.io.read_exact(&mut len_bytes).await.map_err(closed_on_eof)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > max_bytes {
            return Err(TransportError::Overrun { max: max_bytes, received: len });
        }

        let mut buffer = vec![0u8; len];
        self.io.read_exact(&mut buffer).await.map_err(closed_on_eof)?;
        Ok(buffer)
    }

    async fn write_frame(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let len = u32::try_from(data.len()).map_err(|_| TransportError::ShortWrite {
            expected: data.len(),
            written: 0,
        })?;
        self.io.write_all(&len.to_be_bytes()).await?;
        self.io.write_all(data).await?;
        self.io.flush().await?;
        Ok(data.len())
    }
}

fn closed_on_eof(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(e)
    }
}

#[async_trait]
impl<S> Transport for PacketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_frame(max_bytes))
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => self.read_frame(max_bytes).await,
        }
    }

    async fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<usize, TransportError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.write_frame(data))
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => self.write_frame(data).await,
        }
    }

    fn max_packet_size(&self) -> usize {
        self.packet_size
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_round_trip_over_duplex() {
        let (host, device) = tokio::io::duplex(4096);
        let mut host = PacketStream::new(host, 64);
        let mut device = PacketStream::new(device, 64);

        device.write(b"hello", None).await.unwrap();
        device.write(&[], None).await.unwrap();

        assert_eq!(host.read(64, None).await.unwrap(), b"hello");
        assert!(host.read(64, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (host, device) = tokio::io::duplex(4096);
        let mut host = PacketStream::new(host, 64);
        let mut device = PacketStream::new(device, 64);

        device.write(&[7u8; 32], None).await.unwrap();
        assert!(matches!(
            host.read(16, None).await,
            Err(TransportError::Overrun { max: 16, received: 32 })
        ));
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (host, _device) = tokio::io::duplex(64);
        let mut host = PacketStream::new(host, 64);
        let result = host.read(16, Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_peer_hangup_reports_closed() {
        let (host, device) = tokio::io::duplex(64);
        let mut host = PacketStream::new(host, 64);
        drop(device);
        assert!(matches!(host.read(16, None).await, Err(TransportError::Closed)));
    }
}
