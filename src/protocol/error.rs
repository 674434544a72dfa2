use thiserror::Error;

use super::{CommandId, Status};

/// Protocol violations. Each one is answered with a status code and the
/// session keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid magic word 0x{}", hex::encode(.0))]
    InvalidMagic([u8; 4]),

    #[error("Unsupported command id {0}")]
    UnsupportedCommand(u32),

    #[error("Unsupported client ABI {major}.{minor}")]
    UnsupportedAbi { major: u8, minor: u8 },

    #[error("Unexpected {command} {context}")]
    UnexpectedCommand {
        command: CommandId,
        context: &'static str,
    },

    #[error("Malformed {command}: {reason}")]
    Malformed { command: CommandId, reason: String },

    #[error("Size {size} exceeds the host limit")]
    ExceedsHostLimit { size: u64 },
}

impl ProtocolError {
    pub fn malformed(command: CommandId, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            command,
            reason: reason.into(),
        }
    }

    /// Status code that reports this error to the device.
    pub fn status(&self) -> Status {
        match self {
            ProtocolError::InvalidMagic(_) => Status::InvalidMagicWord,
            ProtocolError::UnsupportedCommand(_) => Status::UnsupportedCmd,
            ProtocolError::UnsupportedAbi { .. } => Status::UnsupportedAbiVersion,
            ProtocolError::UnexpectedCommand { .. } | ProtocolError::Malformed { .. } => Status::MalformedCmd,
            ProtocolError::ExceedsHostLimit { .. } => Status::HostIoError,
        }
    }
}
