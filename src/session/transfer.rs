use tracing::{debug, info, warn};

use super::{ChunkKind, Command, Interrupt, Session, SessionState};
use crate::file_transfer::{TransferMode, TransferState};
use crate::protocol::{CommandHeader, CommandId, FileProperties, FsDumpHeader, ProtocolError, Status};
use crate::transport::Transport;

/// Validates a FILE_TRANSFER sent as an entry of an archive or dump.
fn parse_entry(command: &Command, remaining: u64) -> Result<FileProperties, ProtocolError> {
    if command.id != CommandId::FileTransfer {
        return Err(ProtocolError::UnexpectedCommand {
            command: command.id,
            context: "while waiting for a file entry",
        });
    }
    let entry = FileProperties::parse(&command.payload)?;
    if entry.is_archive() {
        return Err(ProtocolError::malformed(
            CommandId::FileTransfer,
            "entries cannot carry an archive header",
        ));
    }
    if entry.file_size > remaining {
        return Err(ProtocolError::malformed(
            CommandId::FileTransfer,
            format!("{}-byte entry overruns the {} bytes left", entry.file_size, remaining),
        ));
    }
    Ok(entry)
}

impl<T: Transport> Session<T> {
    /// FILE_TRANSFER while idle: a single file or an archive.
    pub(super) async fn receive_file(&mut self, command: Command) -> Result<(), Interrupt> {
        let properties = FileProperties::parse(&command.payload)?;
        let path = properties.path();
        let mode = if properties.is_archive() {
            TransferMode::Archive
        } else {
            TransferMode::SingleFile
        };

        info!("Receiving {} {} ({} bytes)", mode, path, properties.file_size);
        let mut transfer = TransferState::new(mode, &path, properties.file_size, properties.archive_header_size);
        self.begin_transfer(&transfer);

        let outcome = match mode {
            TransferMode::Archive => self.archive(&mut transfer, &path).await,
            _ => self.single_file(&mut transfer, &path).await,
        };
        if outcome.is_ok() {
            self.report.files_received += 1;
        }
        self.finish_transfer(transfer, outcome).await
    }

    /// START_FS_TRANSFER while idle.
    pub(super) async fn receive_fs_dump(&mut self, command: Command) -> Result<(), Interrupt> {
        let header = FsDumpHeader::parse(&command.payload)?;
        let root = header.root_path();

        info!("Receiving filesystem dump {} ({} bytes)", root, header.fs_size);
        let mut transfer = TransferState::new(TransferMode::FilesystemDump, &root, header.fs_size, 0);
        self.begin_transfer(&transfer);

        let outcome = self.fs_dump(&mut transfer).await;
        self.finish_transfer(transfer, outcome).await
    }

    fn begin_transfer(&mut self, transfer: &TransferState) {
        self.state = SessionState::Transfer(transfer.mode());
        self.observer.on_transfer_begin(transfer.name(), transfer.total_size());
    }

    async fn finish_transfer(&mut self, transfer: TransferState, outcome: Result<(), Interrupt>) -> Result<(), Interrupt> {
        self.state = SessionState::Idle;
        self.observer.on_transfer_end();
        match outcome {
            Ok(()) => {
                info!("Finished {} {} ({} bytes)", transfer.mode(), transfer.name(), transfer.consumed());
                self.observer.on_notify("Transfer finished");
                Ok(())
            }
            Err(interrupt) => {
                if let Interrupt::Failed(e) = &interrupt {
                    warn!("Aborting {} {}: {}", transfer.mode(), transfer.name(), e);
                    self.report.transfers_failed += 1;
                }
                transfer.discard(self.sinks.as_ref()).await;
                Err(interrupt)
            }
        }
    }

    async fn single_file(&mut self, transfer: &mut TransferState, path: &str) -> Result<(), Interrupt> {
        transfer.open(self.sinks.as_ref(), path).await?;
        self.link.send_status(Status::Success).await?;

        let size = transfer.total_size();
        self.receive_body(transfer, size).await?;

        transfer.close().await?;
        self.link.send_status(Status::Success).await?;
        Ok(())
    }

    async fn archive(&mut self, transfer: &mut TransferState, path: &str) -> Result<(), Interrupt> {
        let header_size = transfer.archive_header_size();
        transfer.open(self.sinks.as_ref(), path).await?;
        self.link.send_status(Status::Success).await?;
        transfer.seek(u64::from(header_size)).await?;

        while !transfer.is_body_complete() {
            let command = self.link.next_command().await?;
            self.check_cancel(&command).await?;

            let entry = parse_entry(&command, transfer.remaining())?;
            debug!("Archive entry {} ({} bytes)", entry.path(), entry.file_size);
            self.link.send_status(Status::Success).await?;
            self.receive_body(transfer, entry.file_size).await?;
            self.link.send_status(Status::Success).await?;
        }

        let command = self.link.next_command().await?;
        self.check_cancel(&command).await?;
        if command.id != CommandId::FileHeaderTransfer {
            return Err(ProtocolError::UnexpectedCommand {
                command: command.id,
                context: "while waiting for the archive header",
            }
            .into());
        }
        if command.payload.len() != header_size as usize {
            return Err(ProtocolError::malformed(
                command.id,
                format!("header is {} bytes, expected {}", command.payload.len(), header_size),
            )
            .into());
        }

        transfer.write_header(&command.payload).await?;
        self.record_progress(command.payload.len() as u64);
        transfer.close().await?;
        self.link.send_status(Status::Success).await?;
        Ok(())
    }

    async fn fs_dump(&mut self, transfer: &mut TransferState) -> Result<(), Interrupt> {
        self.link.send_status(Status::Success).await?;

        while !transfer.is_body_complete() {
            let command = self.link.next_command().await?;
            self.check_cancel(&command).await?;

            let entry = parse_entry(&command, transfer.remaining())?;
            let path = entry.path();
            debug!("Filesystem entry {} ({} bytes)", path, entry.file_size);
            transfer.open(self.sinks.as_ref(), &path).await?;
            self.link.send_status(Status::Success).await?;
            self.receive_body(transfer, entry.file_size).await?;
            transfer.close().await?;
            self.report.files_received += 1;
            self.link.send_status(Status::Success).await?;
        }

        let command = self.link.next_command().await?;
        self.check_cancel(&command).await?;
        if command.id != CommandId::EndFsTransfer {
            return Err(ProtocolError::UnexpectedCommand {
                command: command.id,
                context: "while waiting for END_FS_TRANSFER",
            }
            .into());
        }
        command.expect_empty()?;
        self.link.send_status(Status::Success).await?;
        Ok(())
    }

    /// Streams `size` body bytes into the open sink.
    ///
    /// A chunk that is a command header ends the body early: a cancel is
    /// acknowledged, anything else is rejected. An empty chunk counts as a cancel.
    async fn receive_body(&mut self, transfer: &mut TransferState, size: u64) -> Result<(), Interrupt> {
        let timeout = Some(self.options.transfer_timeout);
        let chunk_size = self.options.chunk_size as u64;
        let mut received = 0u64;

        while received < size {
            let want = (size - received).min(chunk_size) as usize;
            let chunk = self.link.channel().read_chunk(want, timeout).await?;
            match ChunkKind::classify(&chunk) {
                ChunkKind::Empty => {
                    warn!("Empty chunk after {} of {} bytes, cancelling", received, size);
                    self.link.send_status(Status::Success).await?;
                    return Err(Interrupt::Cancelled);
                }
                ChunkKind::Command(header) => return Err(self.in_stream_command(header).await),
                ChunkKind::Data => {}
            }

            transfer.write(&chunk).await?;
            received += chunk.len() as u64;
            self.record_progress(chunk.len() as u64);
        }

        self.link.channel().read_end(timeout).await?;
        Ok(())
    }

    async fn in_stream_command(&mut self, header: CommandHeader) -> Interrupt {
        let command = match self.link.complete_command(header).await {
            Ok(Ok(command)) => command,
            Ok(Err(rejected)) => return rejected.into(),
            Err(e) => return e.into(),
        };
        if command.id != CommandId::CancelTransfer {
            return ProtocolError::UnexpectedCommand {
                command: command.id,
                context: "during a data transfer",
            }
            .into();
        }
        match self.acknowledge_cancel(&command).await {
            Ok(()) => Interrupt::Cancelled,
            Err(interrupt) => interrupt,
        }
    }

    /// Turns a CANCEL_TRANSFER at an entry boundary into [`Interrupt::Cancelled`].
    async fn check_cancel(&mut self, command: &Command) -> Result<(), Interrupt> {
        if command.id != CommandId::CancelTransfer {
            return Ok(());
        }
        self.acknowledge_cancel(command).await?;
        Err(Interrupt::Cancelled)
    }

    async fn acknowledge_cancel(&mut self, command: &Command) -> Result<(), Interrupt> {
        command.expect_empty()?;
        self.link.send_status(Status::Success).await?;
        Ok(())
    }

    fn record_progress(&mut self, bytes: u64) {
        self.report.bytes_received += bytes;
        self.observer.on_progress(bytes);
    }
}
