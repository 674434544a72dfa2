use std::io;

use thiserror::Error;

use crate::codec::StructError;
use crate::file_transfer::SinkError;
use crate::protocol::{ProtocolError, Status};
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Host I/O error on {path}: {source}")]
    HostIo {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Record encoding failed: {0}")]
    Encoding(#[from] StructError),

    #[error("Client ABI {major}.{minor} is incompatible")]
    IncompatibleClient { major: u8, minor: u8 },
}

impl SessionError {
    /// Recoverable errors are reported with a status and the session goes on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SessionError::Protocol(_) | SessionError::HostIo { .. })
    }

    /// Status code reporting this error to the device, if one applies.
    pub fn status(&self) -> Option<Status> {
        match self {
            SessionError::Protocol(e) => Some(e.status()),
            SessionError::HostIo { .. } => Some(Status::HostIoError),
            SessionError::IncompatibleClient { .. } => Some(Status::UnsupportedAbiVersion),
            SessionError::Transport(_) | SessionError::Encoding(_) => None,
        }
    }
}

impl From<SinkError> for SessionError {
    fn from(e: SinkError) -> Self {
        SessionError::HostIo {
            path: e.path,
            source: e.source,
        }
    }
}

/// Early exit from a command handler.
///
/// Cancellation unwinds the same way an error does but is not one.
#[derive(Debug)]
pub(crate) enum Interrupt {
    Cancelled,
    Failed(SessionError),
}

impl From<SessionError> for Interrupt {
    fn from(e: SessionError) -> Self {
        Interrupt::Failed(e)
    }
}

impl From<TransportError> for Interrupt {
    fn from(e: TransportError) -> Self {
        Interrupt::Failed(e.into())
    }
}

impl From<ProtocolError> for Interrupt {
    fn from(e: ProtocolError) -> Self {
        Interrupt::Failed(e.into())
    }
}

impl From<SinkError> for Interrupt {
    fn from(e: SinkError) -> Self {
        Interrupt::Failed(e.into())
    }
}

impl From<StructError> for Interrupt {
    fn from(e: StructError) -> Self {
        Interrupt::Failed(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandId;

    #[test]
    fn test_recoverable_errors_carry_status() {
        let malformed = SessionError::from(ProtocolError::malformed(CommandId::EndSession, "payload"));
        assert!(malformed.is_recoverable());
        assert_eq!(malformed.status(), Some(Status::MalformedCmd));

        let host = SessionError::from(SinkError {
            path: "a.bin".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        });
        assert!(host.is_recoverable());
        assert_eq!(host.status(), Some(Status::HostIoError));
        assert_eq!(host.to_string(), "Host I/O error on a.bin: denied");
    }

    #[test]
    fn test_transport_errors_are_fatal() {
        let err = SessionError::from(TransportError::Closed);
        assert!(!err.is_recoverable());
        assert_eq!(err.status(), None);

        let abi = SessionError::IncompatibleClient { major: 2, minor: 0 };
        assert!(!abi.is_recoverable());
        assert_eq!(abi.status(), Some(Status::UnsupportedAbiVersion));
    }
}
