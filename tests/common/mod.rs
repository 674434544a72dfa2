#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nxdt_host::file_transfer::{DirectorySinks, TransferObserver};
use nxdt_host::protocol::{
    CommandHeader, CommandId, FileProperties, FsDumpHeader, SessionHeader, Status, StatusResponse, ABI_MAJOR,
    ABI_MINOR, STATUS_RESPONSE_SIZE,
};
use nxdt_host::transport::{Transport, TransportError};
use nxdt_host::{Session, SessionOptions};

pub const PACKET_SIZE: usize = 512;

/// Everything the host did to a [`ScriptedTransport`].
#[derive(Debug, Default)]
pub struct TransportLog {
    pub writes: Vec<Vec<u8>>,
    pub read_requests: Vec<(usize, Option<Duration>)>,
    pub closed: bool,
}

impl TransportLog {
    /// Status codes sent so far, ZLT writes skipped.
    pub fn statuses(&self) -> Vec<Status> {
        self.writes
            .iter()
            .filter(|w| w.len() == STATUS_RESPONSE_SIZE)
            .map(|w| {
                let response = StatusResponse::decode(w).expect("status response");
                Status::from_u32(response.status).expect("known status")
            })
            .collect()
    }

    pub fn empty_writes(&self) -> usize {
        self.writes.iter().filter(|w| w.is_empty()).count()
    }
}

/// Replays device-to-host transfers from a queue. Once the queue runs dry
/// every read reports a closed transport.
pub struct ScriptedTransport {
    reads: VecDeque<Vec<u8>>,
    log: Arc<Mutex<TransportLog>>,
    packet_size: usize,
}

impl ScriptedTransport {
    pub fn new(script: DeviceScript) -> (Self, Arc<Mutex<TransportLog>>) {
        let log = Arc::new(Mutex::new(TransportLog::default()));
        let transport = Self {
            reads: script.reads,
            log: log.clone(),
            packet_size: script.packet_size,
        };
        (transport, log)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        self.log.lock().unwrap().read_requests.push((max_bytes, timeout));
        self.reads.pop_front().ok_or(TransportError::Closed)
    }

    async fn write(&mut self, data: &[u8], _timeout: Option<Duration>) -> Result<usize, TransportError> {
        self.log.lock().unwrap().writes.push(data.to_vec());
        Ok(data.len())
    }

    fn max_packet_size(&self) -> usize {
        self.packet_size
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Builds the sequence of transfers a device sends.
#[derive(Debug, Clone)]
pub struct DeviceScript {
    reads: VecDeque<Vec<u8>>,
    packet_size: usize,
}

impl Default for DeviceScript {
    fn default() -> Self {
        Self::new(PACKET_SIZE)
    }
}

impl DeviceScript {
    pub fn new(packet_size: usize) -> Self {
        Self {
            reads: VecDeque::new(),
            packet_size,
        }
    }

    /// One raw bulk transfer.
    pub fn raw(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.reads.push_back(bytes.into());
        self
    }

    pub fn zlt(self) -> Self {
        self.raw(Vec::new())
    }

    /// A data chunk, followed by a ZLT when it is packet aligned.
    pub fn data(self, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let aligned = !bytes.is_empty() && bytes.len() % self.packet_size == 0;
        let script = self.raw(bytes);
        if aligned {
            script.zlt()
        } else {
            script
        }
    }

    pub fn header(self, command_id: u32, payload_size: u32) -> Self {
        let header = CommandHeader {
            command_id,
            ..CommandHeader::new(CommandId::StartSession, payload_size)
        };
        self.raw(header.encode().unwrap())
    }

    /// A command header plus its payload.
    pub fn command(self, id: CommandId, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        let script = self.header(id.as_u32(), payload.len() as u32);
        if payload.is_empty() {
            script
        } else {
            script.data(payload)
        }
    }

    pub fn start_session(self) -> Self {
        self.start_session_with_abi(ABI_MAJOR, ABI_MINOR)
    }

    pub fn start_session_with_abi(self, major: u8, minor: u8) -> Self {
        let header = SessionHeader::new((1, 2, 0), major, minor, "f00dcafe");
        self.command(CommandId::StartSession, header.encode().unwrap())
    }

    pub fn file_transfer(self, path: &str, size: u64) -> Self {
        self.command(CommandId::FileTransfer, FileProperties::new(path, size, 0).encode().unwrap())
    }

    pub fn archive_transfer(self, path: &str, size: u64, header_size: u32) -> Self {
        self.command(
            CommandId::FileTransfer,
            FileProperties::new(path, size, header_size).encode().unwrap(),
        )
    }

    pub fn file_header(self, header: impl Into<Vec<u8>>) -> Self {
        self.command(CommandId::FileHeaderTransfer, header)
    }

    pub fn start_fs_transfer(self, root: &str, size: u64) -> Self {
        self.command(CommandId::StartFsTransfer, FsDumpHeader::new(root, size).encode().unwrap())
    }

    pub fn end_fs_transfer(self) -> Self {
        self.command(CommandId::EndFsTransfer, Vec::new())
    }

    pub fn cancel(self) -> Self {
        self.command(CommandId::CancelTransfer, Vec::new())
    }

    pub fn end_session(self) -> Self {
        self.command(CommandId::EndSession, Vec::new())
    }
}

/// Observer that records every callback.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<ObserverEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    Begin(String, u64),
    Progress(u64),
    End,
    Notify(String),
}

impl RecordingObserver {
    pub fn notifications(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Notify(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn progress_total(&self) -> u64 {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                ObserverEvent::Progress(bytes) => *bytes,
                _ => 0,
            })
            .sum()
    }
}

impl TransferObserver for RecordingObserver {
    fn on_transfer_begin(&self, name: &str, total: u64) {
        self.events.lock().unwrap().push(ObserverEvent::Begin(name.to_string(), total));
    }

    fn on_progress(&self, bytes: u64) {
        self.events.lock().unwrap().push(ObserverEvent::Progress(bytes));
    }

    fn on_transfer_end(&self) {
        self.events.lock().unwrap().push(ObserverEvent::End);
    }

    fn on_notify(&self, message: &str) {
        self.events.lock().unwrap().push(ObserverEvent::Notify(message.to_string()));
    }
}

/// A session over a scripted device, writing into `root`.
pub struct Harness {
    pub session: Session<ScriptedTransport>,
    pub log: Arc<Mutex<TransportLog>>,
    pub observer: Arc<RecordingObserver>,
}

pub fn harness(script: DeviceScript, root: &std::path::Path) -> Harness {
    harness_with_options(script, root, SessionOptions::default())
}

pub fn harness_with_options(script: DeviceScript, root: &std::path::Path, options: SessionOptions) -> Harness {
    let (transport, log) = ScriptedTransport::new(script);
    let observer = Arc::new(RecordingObserver::default());
    let session = Session::with_options(
        transport,
        Arc::new(DirectorySinks::new(root)),
        observer.clone(),
        options,
    );
    Harness { session, log, observer }
}

/// Deterministic, non-repeating-looking test data.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
