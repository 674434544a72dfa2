//! Host side of one NXDT session: handshake, command dispatch and the
//! transfer state machines.

pub mod error;
pub mod framing;
mod transfer;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use crate::file_transfer::{SinkFactory, TransferMode, TransferObserver};
use crate::protocol::records::parse_session_header;
use crate::protocol::{ClientInfo, CommandId, ProtocolError, Status, ABI_MAJOR, ABI_MINOR, FILE_BLOCK_SIZE, TRANSFER_TIMEOUT};
use crate::transport::Transport;
use crate::utils;

pub use error::SessionError;
pub(crate) use error::Interrupt;
pub use framing::{ChunkKind, Command, CommandLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Largest data read issued during a transfer body.
    pub chunk_size: usize,
    /// Bound on payload reads, data reads and status writes.
    pub transfer_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_size: FILE_BLOCK_SIZE,
            transfer_timeout: TRANSFER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshake,
    Idle,
    Transfer(TransferMode),
    Closed,
}

/// Summary of what a session did, returned when it ends cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub client: Option<ClientInfo>,
    pub files_received: u64,
    pub bytes_received: u64,
    pub transfers_cancelled: u64,
    pub transfers_failed: u64,
}

/// One device connection.
pub struct Session<T> {
    id: String,
    link: CommandLink<T>,
    sinks: Arc<dyn SinkFactory>,
    observer: Arc<dyn TransferObserver>,
    options: SessionOptions,
    state: SessionState,
    report: SessionReport,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, sinks: Arc<dyn SinkFactory>, observer: Arc<dyn TransferObserver>) -> Self {
        Self::with_options(transport, sinks, observer, SessionOptions::default())
    }

    pub fn with_options(
        transport: T,
        sinks: Arc<dyn SinkFactory>,
        observer: Arc<dyn TransferObserver>,
        options: SessionOptions,
    ) -> Self {
        let id = utils::generate_id();
        let options = SessionOptions {
            chunk_size: options.chunk_size.max(1),
            ..options
        };
        Self {
            report: SessionReport {
                session_id: id.clone(),
                ..SessionReport::default()
            },
            id,
            link: CommandLink::new(transport, options.transfer_timeout),
            sinks,
            observer,
            options,
            state: SessionState::Handshake,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    /// Drives the session until END_SESSION or a fatal error, then closes
    /// the transport.
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        let span = info_span!("session", id = %self.id);
        async move {
            let result = self.serve().await;
            let reached = self.state;
            self.state = SessionState::Closed;
            if let Err(e) = self.link.close().await {
                warn!("Failed to close transport: {}", e);
            }

            match result {
                Ok(()) => {
                    info!(
                        files = self.report.files_received,
                        bytes = self.report.bytes_received,
                        "Session ended"
                    );
                    self.observer.on_notify("Device disconnected");
                    Ok(self.report)
                }
                Err(e) => {
                    error!("Session failed: {}", e);
                    match (&e, reached) {
                        (SessionError::IncompatibleClient { .. }, _) => {}
                        (SessionError::Transport(_), SessionState::Handshake) => {
                            self.observer.on_notify("Application unresponsive");
                        }
                        _ => self.observer.on_notify("Application error"),
                    }
                    self.observer.on_notify("Device disconnected");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        self.handshake().await?;

        while self.state != SessionState::Closed {
            let command = self.link.next_command().await?;
            match self.dispatch(command).await {
                Ok(()) => {}
                Err(Interrupt::Cancelled) => {
                    info!("Operation cancelled by device");
                    self.report.transfers_cancelled += 1;
                    self.observer.on_notify("Operation cancelled");
                }
                Err(Interrupt::Failed(e)) => self.report_failure(e).await?,
            }
        }
        Ok(())
    }

    /// Answers a recoverable error with its status; anything else ends the session.
    async fn report_failure(&mut self, e: SessionError) -> Result<(), SessionError> {
        match e.status() {
            Some(status) if e.is_recoverable() => {
                warn!("{} -> {}", e, status);
                self.link.send_status(status).await
            }
            _ => Err(e),
        }
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        loop {
            let command = self.link.next_command().await?;
            match accept_client(&command) {
                Ok(client) => {
                    self.link.send_status(Status::Success).await?;
                    info!("Client connected: {}", client);
                    self.report.client = Some(client);
                    self.state = SessionState::Idle;
                    self.observer.on_notify("Device connected");
                    return Ok(());
                }
                Err(e @ SessionError::IncompatibleClient { .. }) => {
                    self.link.send_status(Status::UnsupportedAbiVersion).await?;
                    self.observer.on_notify("Application incompatible");
                    return Err(e);
                }
                Err(e) => self.report_failure(e).await?,
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<(), Interrupt> {
        match command.id {
            CommandId::FileTransfer => self.receive_file(command).await,
            CommandId::StartFsTransfer => self.receive_fs_dump(command).await,
            CommandId::EndSession => self.end_session(command).await,
            CommandId::CancelTransfer => Err(ProtocolError::UnexpectedCommand {
                command: command.id,
                context: "with no transfer in progress",
            }
            .into()),
            other => Err(ProtocolError::UnexpectedCommand {
                command: other,
                context: "while idle",
            }
            .into()),
        }
    }

    async fn end_session(&mut self, command: Command) -> Result<(), Interrupt> {
        command.expect_empty()?;
        self.observer.on_notify("Disconnecting device");
        self.link.send_status(Status::Success).await?;
        self.state = SessionState::Closed;
        Ok(())
    }
}

fn accept_client(command: &Command) -> Result<ClientInfo, SessionError> {
    if command.id != CommandId::StartSession {
        return Err(ProtocolError::UnexpectedCommand {
            command: command.id,
            context: "before START_SESSION",
        }
        .into());
    }
    let header = parse_session_header(&command.payload)?;
    let (major, minor) = (header.abi_major(), header.abi_minor());
    if major != ABI_MAJOR {
        return Err(SessionError::IncompatibleClient { major, minor });
    }
    if minor != ABI_MINOR {
        warn!("Client ABI minor {} differs from {}, continuing", minor, ABI_MINOR);
    }
    Ok(header.client_info())
}
