pub mod codec;
pub mod file_transfer;
pub mod infrastructure;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod utils;

// Re-exports for integration tests and the binary
pub use codec::{Endianness, Struct, StructBuilder, StructError, Value};
pub use file_transfer::{DirectorySinks, FileSink, SinkFactory, TransferObserver};
pub use session::{Session, SessionError, SessionOptions, SessionReport, SessionState};
pub use transport::{PacketStream, Transport, TransportError};
