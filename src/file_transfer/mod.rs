//! Host-side storage for received files and the observer hooks that report on it.

pub mod observer;
pub mod sink;
pub mod types;

pub use observer::{ProgressObserver, TracingObserver, TransferObserver};
pub use sink::{DirectorySinks, FileSink, SinkFactory};
pub use types::{SinkError, TransferMode, TransferState};
