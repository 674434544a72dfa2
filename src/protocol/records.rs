use std::fmt;

use once_cell::sync::Lazy;
use serde::Serialize;

use super::error::ProtocolError;
use super::{
    CommandId, Status, COMMAND_HEADER_SIZE, FILE_PROPERTIES_SIZE, FS_DUMP_HEADER_SIZE, MAGIC, MAX_PATH,
    MAX_SAFE_FILE_SIZE, PATH_FIELD_SIZE, SESSION_HEADER_SIZE,
};
use crate::codec::{Struct, StructBuilder, StructError, Value};

static COMMAND_HEADER: Lazy<Struct> =
    Lazy::new(|| StructBuilder::little().bytes(4).u32().u32().u32().build());

static STATUS_RESPONSE: Lazy<Struct> =
    Lazy::new(|| StructBuilder::little().bytes(4).u32().u16().pad(6).build());

static SESSION_HEADER: Lazy<Struct> = Lazy::new(|| {
    StructBuilder::little()
        .u8()
        .u8()
        .u8()
        .u8()
        .bytes(8)
        .pad(4)
        .build()
});

static FILE_PROPERTIES: Lazy<Struct> = Lazy::new(|| {
    StructBuilder::little()
        .u64()
        .u32()
        .u32()
        .bytes(PATH_FIELD_SIZE)
        .pad(15)
        .build()
});

static FS_DUMP_HEADER: Lazy<Struct> =
    Lazy::new(|| StructBuilder::little().u64().bytes(PATH_FIELD_SIZE).pad(7).build());

/// Pulls typed values out of an unpacked record in field order.
struct Fields {
    values: std::vec::IntoIter<Value>,
    index: usize,
}

impl Fields {
    fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into_iter(),
            index: 0,
        }
    }

    fn take<T>(&mut self, expected: &'static str, pick: fn(Value) -> Option<T>) -> Result<T, StructError> {
        let index = self.index;
        self.index += 1;
        let value = self.values.next().ok_or(StructError::ValueCount {
            expected: index + 1,
            got: index,
        })?;
        let found = value.kind_name();
        pick(value).ok_or(StructError::ValueType { index, expected, found })
    }

    fn u8(&mut self) -> Result<u8, StructError> {
        self.take("u8", |v| v.as_u8())
    }

    fn u16(&mut self) -> Result<u16, StructError> {
        self.take("u16", |v| v.as_u16())
    }

    fn u32(&mut self) -> Result<u32, StructError> {
        self.take("u32", |v| v.as_u32())
    }

    fn u64(&mut self) -> Result<u64, StructError> {
        self.take("u64", |v| v.as_u64())
    }

    fn bytes(&mut self) -> Result<Vec<u8>, StructError> {
        self.take("bytes", Value::into_bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], StructError> {
        let bytes = self.bytes()?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| StructError::BufferTooSmall {
            needed: N,
            offset: 0,
            available: len,
        })
    }
}

fn nul_trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_matches('\0').to_string()
}

/// 16-byte header that precedes every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub magic: [u8; 4],
    pub command_id: u32,
    pub payload_size: u32,
}

impl CommandHeader {
    pub fn new(command: CommandId, payload_size: u32) -> Self {
        Self {
            magic: MAGIC,
            command_id: command.as_u32(),
            payload_size,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StructError> {
        let mut fields = Fields::new(COMMAND_HEADER.unpack(bytes)?);
        Ok(Self {
            magic: fields.array()?,
            command_id: fields.u32()?,
            payload_size: fields.u32()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StructError> {
        COMMAND_HEADER.pack(&[
            Value::from(self.magic),
            Value::from(self.command_id),
            Value::from(self.payload_size),
            Value::from(0u32),
        ])
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Checks magic and command id, in that order.
    pub fn validate(&self) -> Result<CommandId, ProtocolError> {
        if !self.has_valid_magic() {
            return Err(ProtocolError::InvalidMagic(self.magic));
        }
        CommandId::from_u32(self.command_id).ok_or(ProtocolError::UnsupportedCommand(self.command_id))
    }
}

/// 16-byte reply sent after every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResponse {
    pub magic: [u8; 4],
    pub status: u32,
    pub max_packet_size: u16,
}

impl StatusResponse {
    pub fn new(status: Status, max_packet_size: u16) -> Self {
        Self {
            magic: MAGIC,
            status: status.code(),
            max_packet_size,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StructError> {
        let mut fields = Fields::new(STATUS_RESPONSE.unpack(bytes)?);
        Ok(Self {
            magic: fields.array()?,
            status: fields.u32()?,
            max_packet_size: fields.u16()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StructError> {
        STATUS_RESPONSE.pack(&[
            Value::from(self.magic),
            Value::from(self.status),
            Value::from(self.max_packet_size),
        ])
    }
}

/// START_SESSION payload describing the client application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub version_micro: u8,
    /// Major ABI in the high nibble, minor in the low nibble.
    pub abi_version: u8,
    pub commit: [u8; 8],
}

impl SessionHeader {
    pub fn new(version: (u8, u8, u8), abi_major: u8, abi_minor: u8, commit: &str) -> Self {
        let mut raw = [0u8; 8];
        let len = commit.len().min(raw.len());
        raw[..len].copy_from_slice(&commit.as_bytes()[..len]);
        Self {
            version_major: version.0,
            version_minor: version.1,
            version_micro: version.2,
            abi_version: ((abi_major & 0x0F) << 4) | (abi_minor & 0x0F),
            commit: raw,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StructError> {
        let mut fields = Fields::new(SESSION_HEADER.unpack(bytes)?);
        Ok(Self {
            version_major: fields.u8()?,
            version_minor: fields.u8()?,
            version_micro: fields.u8()?,
            abi_version: fields.u8()?,
            commit: fields.array()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StructError> {
        SESSION_HEADER.pack(&[
            Value::from(self.version_major),
            Value::from(self.version_minor),
            Value::from(self.version_micro),
            Value::from(self.abi_version),
            Value::from(self.commit),
        ])
    }

    pub fn abi_major(&self) -> u8 {
        (self.abi_version >> 4) & 0x0F
    }

    pub fn abi_minor(&self) -> u8 {
        self.abi_version & 0x0F
    }

    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            version: format!("{}.{}.{}", self.version_major, self.version_minor, self.version_micro),
            abi_major: self.abi_major(),
            abi_minor: self.abi_minor(),
            commit: nul_trimmed(&self.commit),
        }
    }
}

/// Client application details negotiated at handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub version: String,
    pub abi_major: u8,
    pub abi_minor: u8,
    pub commit: String,
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (abi {}.{}, commit {})",
            self.version, self.abi_major, self.abi_minor, self.commit
        )
    }
}

/// FILE_TRANSFER payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProperties {
    pub file_size: u64,
    pub path_length: u32,
    /// Non-zero for an archive whose header is sent last.
    pub archive_header_size: u32,
    pub raw_path: Vec<u8>,
}

impl FileProperties {
    pub fn new(path: &str, file_size: u64, archive_header_size: u32) -> Self {
        Self {
            file_size,
            path_length: path.len() as u32,
            archive_header_size,
            raw_path: path.as_bytes().to_vec(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StructError> {
        let mut fields = Fields::new(FILE_PROPERTIES.unpack(bytes)?);
        Ok(Self {
            file_size: fields.u64()?,
            path_length: fields.u32()?,
            archive_header_size: fields.u32()?,
            raw_path: fields.bytes()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StructError> {
        FILE_PROPERTIES.pack(&[
            Value::from(self.file_size),
            Value::from(self.path_length),
            Value::from(self.archive_header_size),
            Value::from(self.raw_path.as_slice()),
        ])
    }

    /// Decodes and validates a FILE_TRANSFER payload.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != FILE_PROPERTIES_SIZE {
            return Err(ProtocolError::malformed(
                CommandId::FileTransfer,
                format!("payload is {} bytes, expected {FILE_PROPERTIES_SIZE}", payload.len()),
            ));
        }
        let properties = Self::decode(payload)
            .map_err(|e| ProtocolError::malformed(CommandId::FileTransfer, e.to_string()))?;
        properties.validate()?;
        Ok(properties)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.file_size > MAX_SAFE_FILE_SIZE {
            return Err(ProtocolError::ExceedsHostLimit { size: self.file_size });
        }
        if u64::from(self.archive_header_size) >= self.file_size {
            return Err(ProtocolError::malformed(
                CommandId::FileTransfer,
                format!(
                    "archive header size {} is not below file size {}",
                    self.archive_header_size, self.file_size
                ),
            ));
        }
        let path_length = self.path_length as usize;
        if path_length == 0 || path_length > MAX_PATH {
            return Err(ProtocolError::malformed(
                CommandId::FileTransfer,
                format!("path length {path_length} outside 1..={MAX_PATH}"),
            ));
        }
        Ok(())
    }

    pub fn is_archive(&self) -> bool {
        self.archive_header_size > 0
    }

    /// The first `path_length` bytes of the path field, decoded lossily.
    pub fn path(&self) -> String {
        let len = (self.path_length as usize).min(self.raw_path.len());
        String::from_utf8_lossy(&self.raw_path[..len]).into_owned()
    }
}

/// START_FS_TRANSFER payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsDumpHeader {
    pub fs_size: u64,
    pub raw_root_path: Vec<u8>,
}

impl FsDumpHeader {
    pub fn new(root_path: &str, fs_size: u64) -> Self {
        Self {
            fs_size,
            raw_root_path: root_path.as_bytes().to_vec(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StructError> {
        let mut fields = Fields::new(FS_DUMP_HEADER.unpack(bytes)?);
        Ok(Self {
            fs_size: fields.u64()?,
            raw_root_path: fields.bytes()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StructError> {
        FS_DUMP_HEADER.pack(&[Value::from(self.fs_size), Value::from(self.raw_root_path.as_slice())])
    }

    /// Decodes and validates a START_FS_TRANSFER payload.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != FS_DUMP_HEADER_SIZE {
            return Err(ProtocolError::malformed(
                CommandId::StartFsTransfer,
                format!("payload is {} bytes, expected {FS_DUMP_HEADER_SIZE}", payload.len()),
            ));
        }
        let header = Self::decode(payload)
            .map_err(|e| ProtocolError::malformed(CommandId::StartFsTransfer, e.to_string()))?;
        if header.fs_size > MAX_SAFE_FILE_SIZE {
            return Err(ProtocolError::ExceedsHostLimit { size: header.fs_size });
        }
        Ok(header)
    }

    pub fn root_path(&self) -> String {
        nul_trimmed(&self.raw_root_path)
    }
}

/// Decodes a START_SESSION payload, checking only its length.
pub fn parse_session_header(payload: &[u8]) -> Result<SessionHeader, ProtocolError> {
    if payload.len() != SESSION_HEADER_SIZE {
        return Err(ProtocolError::malformed(
            CommandId::StartSession,
            format!("payload is {} bytes, expected {SESSION_HEADER_SIZE}", payload.len()),
        ));
    }
    SessionHeader::decode(payload).map_err(|e| ProtocolError::malformed(CommandId::StartSession, e.to_string()))
}

/// True when `chunk` is exactly header-sized and opens with the magic word.
pub fn looks_like_command(chunk: &[u8]) -> bool {
    chunk.len() == COMMAND_HEADER_SIZE && chunk[..MAGIC.len()] == MAGIC
}
