//! NXDT wire protocol: constants, command and status identifiers, and the
//! typed records exchanged with the device.

pub mod error;
pub mod records;

use std::fmt;
use std::time::Duration;

pub use error::ProtocolError;
pub use records::{ClientInfo, CommandHeader, FileProperties, FsDumpHeader, SessionHeader, StatusResponse};

/// Magic word that opens every command header and status response.
pub const MAGIC: [u8; 4] = *b"NXDT";

/// ABI major version spoken by this host. Clients with another major are rejected.
pub const ABI_MAJOR: u8 = 1;
/// ABI minor version spoken by this host. Minor mismatches are tolerated.
pub const ABI_MINOR: u8 = 2;

pub const COMMAND_HEADER_SIZE: usize = 0x10;
pub const STATUS_RESPONSE_SIZE: usize = 0x10;
pub const SESSION_HEADER_SIZE: usize = 0x10;
pub const FILE_PROPERTIES_SIZE: usize = 0x320;
pub const FS_DUMP_HEADER_SIZE: usize = 0x310;

/// Longest path the device may announce, in bytes.
pub const MAX_PATH: usize = 0x300;
/// On-wire width of a path field: `MAX_PATH` plus a terminating NUL.
pub const PATH_FIELD_SIZE: usize = MAX_PATH + 1;

/// Largest data block requested from the transport in one read.
pub const FILE_BLOCK_SIZE: usize = 0x800000;

/// Largest file size the host accepts (2^53 - 1).
pub const MAX_SAFE_FILE_SIZE: u64 = (1 << 53) - 1;

pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Command identifiers carried in [`CommandHeader::command_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandId {
    StartSession = 0,
    FileTransfer = 1,
    CancelTransfer = 2,
    FileHeaderTransfer = 3,
    EndSession = 4,
    StartFsTransfer = 5,
    EndFsTransfer = 6,
}

impl CommandId {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::StartSession),
            1 => Some(Self::FileTransfer),
            2 => Some(Self::CancelTransfer),
            3 => Some(Self::FileHeaderTransfer),
            4 => Some(Self::EndSession),
            5 => Some(Self::StartFsTransfer),
            6 => Some(Self::EndFsTransfer),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandId::StartSession => "START_SESSION",
            CommandId::FileTransfer => "FILE_TRANSFER",
            CommandId::CancelTransfer => "CANCEL_TRANSFER",
            CommandId::FileHeaderTransfer => "FILE_HEADER_TRANSFER",
            CommandId::EndSession => "END_SESSION",
            CommandId::StartFsTransfer => "START_FS_TRANSFER",
            CommandId::EndFsTransfer => "END_FS_TRANSFER",
        };
        f.write_str(name)
    }
}

/// Status codes sent back to the device in a [`StatusResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Success = 0,
    InvalidMagicWord = 4,
    UnsupportedCmd = 5,
    UnsupportedAbiVersion = 6,
    MalformedCmd = 7,
    HostIoError = 8,
}

impl Status {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            4 => Some(Self::InvalidMagicWord),
            5 => Some(Self::UnsupportedCmd),
            6 => Some(Self::UnsupportedAbiVersion),
            7 => Some(Self::MalformedCmd),
            8 => Some(Self::HostIoError),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::InvalidMagicWord => "INVALID_MAGIC_WORD",
            Status::UnsupportedCmd => "UNSUPPORTED_CMD",
            Status::UnsupportedAbiVersion => "UNSUPPORTED_ABI_VERSION",
            Status::MalformedCmd => "MALFORMED_CMD",
            Status::HostIoError => "HOST_IO_ERROR",
        };
        write!(f, "{name} ({})", self.code())
    }
}
