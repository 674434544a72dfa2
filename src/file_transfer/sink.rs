use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// Writable, seekable destination for transferred bytes.
#[async_trait]
pub trait FileSink: Send {
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Moves the write position to `offset` bytes from the start.
    async fn seek(&mut self, offset: u64) -> io::Result<()>;

    async fn close(self: Box<Self>) -> io::Result<()>;
}

/// Creates sinks for device-supplied paths.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    /// Creates (or truncates) the file at `path`, creating parent directories.
    async fn create(&self, path: &str) -> io::Result<Box<dyn FileSink>>;

    /// Deletes a partially written artifact.
    async fn remove(&self, path: &str) -> io::Result<()>;
}

/// Writes files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySinks {
    root: PathBuf,
}

impl DirectorySinks {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a device path (`/`-separated, possibly with a leading `/`) below
    /// the root. Empty and `.` segments are dropped; `..` is refused.
    pub fn resolve(&self, device_path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        let mut segments = 0;
        for segment in device_path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(part)), None) => resolved.push(part),
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("refusing path segment {segment:?} in {device_path:?}"),
                    ));
                }
            }
            segments += 1;
        }
        if segments == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path {device_path:?} has no file name"),
            ));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl SinkFactory for DirectorySinks {
    async fn create(&self, path: &str) -> io::Result<Box<dyn FileSink>> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(&target).await?;
        debug!("Created {}", target.display());
        Ok(Box::new(DirectorySink { file }))
    }

    async fn remove(&self, path: &str) -> io::Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

struct DirectorySink {
    file: File,
}

#[async_trait]
impl FileSink for DirectorySink {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    async fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(io::SeekFrom::Start(offset)).await?;
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }
}
