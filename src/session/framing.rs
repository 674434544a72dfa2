use std::time::Duration;

use tracing::{debug, warn};

use super::SessionError;
use crate::protocol::records::looks_like_command;
use crate::protocol::{CommandHeader, CommandId, ProtocolError, Status, StatusResponse, COMMAND_HEADER_SIZE};
use crate::transport::{BulkChannel, Transport, TransportError};

/// A framed command: validated id plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: CommandId,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn expect_empty(&self) -> Result<(), ProtocolError> {
        if self.payload.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::malformed(
                self.id,
                format!("expected an empty payload, got {} bytes", self.payload.len()),
            ))
        }
    }
}

/// What a chunk read during the data phase turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// The device gave up on the transfer.
    Empty,
    /// A command header sent in place of data.
    Command(CommandHeader),
    Data,
}

impl ChunkKind {
    pub fn classify(chunk: &[u8]) -> Self {
        if chunk.is_empty() {
            return ChunkKind::Empty;
        }
        if looks_like_command(chunk) {
            if let Ok(header) = CommandHeader::decode(chunk) {
                return ChunkKind::Command(header);
            }
        }
        ChunkKind::Data
    }
}

/// Command/status framing on top of a [`BulkChannel`].
pub struct CommandLink<T> {
    channel: BulkChannel<T>,
    timeout: Duration,
}

impl<T: Transport> CommandLink<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            channel: BulkChannel::new(transport),
            timeout,
        }
    }

    pub fn channel(&mut self) -> &mut BulkChannel<T> {
        &mut self.channel
    }

    /// Waits for the next well-formed command.
    ///
    /// Headers with a bad magic or an unknown id are answered with their
    /// status and skipped. Their payload is left unread.
    pub async fn next_command(&mut self) -> Result<Command, SessionError> {
        loop {
            let raw = self.channel.read_exact(COMMAND_HEADER_SIZE, None).await?;
            let header = CommandHeader::decode(&raw)?;
            match self.complete_command(header).await? {
                Ok(command) => return Ok(command),
                Err(rejected) => {
                    warn!("Rejected command header: {}", rejected);
                    self.send_status(rejected.status()).await?;
                }
            }
        }
    }

    /// Validates `header` and reads its payload.
    ///
    /// The outer error is a transport failure; the inner one a header the
    /// device has to be told about.
    pub async fn complete_command(
        &mut self,
        header: CommandHeader,
    ) -> Result<Result<Command, ProtocolError>, TransportError> {
        let id = match header.validate() {
            Ok(id) => id,
            Err(e) => return Ok(Err(e)),
        };
        let payload = match header.payload_size as usize {
            0 => Vec::new(),
            size => self.channel.read_exact(size, Some(self.timeout)).await?,
        };
        debug!(command = %id, payload = payload.len(), "received command");
        Ok(Ok(Command { id, payload }))
    }

    pub async fn send_status(&mut self, status: Status) -> Result<(), SessionError> {
        let packet_size = u16::try_from(self.channel.packet_size()).unwrap_or(u16::MAX);
        let response = StatusResponse::new(status, packet_size).encode()?;
        self.channel.write(&response, Some(self.timeout)).await?;
        debug!(status = %status, "sent status");
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.channel.close().await
    }
}
