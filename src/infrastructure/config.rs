use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{FILE_BLOCK_SIZE, TRANSFER_TIMEOUT};
use crate::session::SessionOptions;
use crate::transport::stream::DEFAULT_PACKET_SIZE;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory received files are written below
    pub output_directory: String,
    pub listen_address: String,
    pub port: u16,
    /// Packet size advertised by the bridge transport
    pub max_packet_size: usize,
    pub chunk_size: usize,
    pub transfer_timeout_ms: u64,
    pub log_directory: String,
    pub show_progress: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());

        Self {
            output_directory: format!("{}/nxdt", home),
            listen_address: "127.0.0.1".to_string(),
            port: 7100,
            max_packet_size: DEFAULT_PACKET_SIZE,
            chunk_size: FILE_BLOCK_SIZE,
            transfer_timeout_ms: TRANSFER_TIMEOUT.as_millis() as u64,
            log_directory: "logs".to_string(),
            show_progress: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from file or fall back to defaults
    pub fn load_or_default(config_path: Option<&str>) -> Self {
        if let Some(config) = config_path
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
        {
            return config;
        }
        Self::default()
    }

    pub fn output_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.output_directory)
    }

    pub fn log_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.log_directory)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            chunk_size: self.chunk_size,
            transfer_timeout: self.transfer_timeout(),
        }
    }

    /// Ensure all directories exist
    pub fn ensure_directories(&self) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(&self.output_directory)?;
        std::fs::create_dir_all(&self.log_directory)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            bail!("Chunk size must be greater than 0");
        }

        if self.max_packet_size == 0 || self.max_packet_size > usize::from(u16::MAX) {
            bail!("Max packet size must be between 1 and 65535");
        }

        if self.transfer_timeout_ms == 0 {
            bail!("Transfer timeout must be greater than 0");
        }

        if self.port == 0 {
            bail!("Port must be greater than 0");
        }

        if self.output_directory.is_empty() {
            bail!("Output directory must be set");
        }

        Ok(())
    }
}
