use std::fmt;
use std::io;

use thiserror::Error;
use tracing::{debug, warn};

use super::sink::{FileSink, SinkFactory};

/// Host-side storage failure, tagged with the path involved.
#[derive(Error, Debug)]
#[error("Host I/O error on {path}: {source}")]
pub struct SinkError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    SingleFile,
    /// Container whose header is sent after all entries.
    Archive,
    FilesystemDump,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferMode::SingleFile => "single file",
            TransferMode::Archive => "archive",
            TransferMode::FilesystemDump => "filesystem dump",
        };
        f.write_str(name)
    }
}

/// Bookkeeping for the transfer a session is running.
///
/// `consumed` counts body bytes stored so far. For an archive that excludes
/// the deferred header; for a filesystem dump it spans every entry.
pub struct TransferState {
    mode: TransferMode,
    name: String,
    total_size: u64,
    consumed: u64,
    archive_header_size: u32,
    sink: Option<Box<dyn FileSink>>,
    sink_path: Option<String>,
}

impl TransferState {
    pub fn new(mode: TransferMode, name: impl Into<String>, total_size: u64, archive_header_size: u32) -> Self {
        Self {
            mode,
            name: name.into(),
            total_size,
            consumed: 0,
            archive_header_size,
            sink: None,
            sink_path: None,
        }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn archive_header_size(&self) -> u32 {
        self.archive_header_size
    }

    /// Body bytes still expected: everything but the deferred archive header.
    pub fn remaining(&self) -> u64 {
        self.total_size
            .saturating_sub(u64::from(self.archive_header_size))
            .saturating_sub(self.consumed)
    }

    pub fn is_body_complete(&self) -> bool {
        self.remaining() == 0
    }

    pub fn has_open_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn sink_path(&self) -> Option<&str> {
        self.sink_path.as_deref()
    }

    fn sink_error(&self, source: io::Error) -> SinkError {
        SinkError {
            path: self.sink_path.clone().unwrap_or_else(|| self.name.clone()),
            source,
        }
    }

    /// Creates the sink at `path`. A previously open sink is closed first.
    pub async fn open(&mut self, sinks: &dyn SinkFactory, path: &str) -> Result<(), SinkError> {
        self.close().await?;
        let sink = sinks.create(path).await.map_err(|source| SinkError {
            path: path.to_string(),
            source,
        })?;
        self.sink = Some(sink);
        self.sink_path = Some(path.to_string());
        Ok(())
    }

    /// Appends body bytes to the open sink.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let result = match self.sink.as_mut() {
            Some(sink) => sink.write(data).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no open sink")),
        };
        result.map_err(|e| self.sink_error(e))?;
        self.consumed += data.len() as u64;
        Ok(())
    }

    pub async fn seek(&mut self, offset: u64) -> Result<(), SinkError> {
        let result = match self.sink.as_mut() {
            Some(sink) => sink.seek(offset).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no open sink")),
        };
        result.map_err(|e| self.sink_error(e))
    }

    /// Writes the deferred archive header at offset 0. Not counted as body.
    pub async fn write_header(&mut self, header: &[u8]) -> Result<(), SinkError> {
        self.seek(0).await?;
        let result = match self.sink.as_mut() {
            Some(sink) => sink.write(header).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no open sink")),
        };
        result.map_err(|e| self.sink_error(e))
    }

    /// Closes the open sink. The artifact is kept.
    pub async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(sink) = self.sink.take() {
            sink.close().await.map_err(|e| self.sink_error(e))?;
            debug!("Closed {}", self.sink_path.as_deref().unwrap_or(&self.name));
        }
        self.sink_path = None;
        Ok(())
    }

    /// Drops the transfer, removing whatever artifact is still in flight.
    pub async fn discard(mut self, sinks: &dyn SinkFactory) {
        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                warn!("Failed to close {}: {}", self.name, e);
            }
        }
        if let Some(path) = self.sink_path.take() {
            match sinks.remove(&path).await {
                Ok(()) => debug!("Removed partial artifact {}", path),
                Err(e) => warn!("Failed to remove partial artifact {}: {}", path, e),
            }
        }
    }
}

impl fmt::Debug for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferState")
            .field("mode", &self.mode)
            .field("name", &self.name)
            .field("total_size", &self.total_size)
            .field("consumed", &self.consumed)
            .field("archive_header_size", &self.archive_header_size)
            .field("sink_path", &self.sink_path)
            .finish()
    }
}
