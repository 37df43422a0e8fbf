//! Error types for backend execution and queue misuse.

use thiserror::Error;

use crate::task::Operation;
use crate::types::Access;
use crate::writable::WritableId;

/// Errors raised while staging or executing IO tasks.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object (path, dataset or attribute) not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The requested operation is not supported by this backend.
    #[error("{backend}: operation {operation} not supported")]
    Unsupported {
        /// Backend name.
        backend: String,
        /// The rejected operation.
        operation: Operation,
    },

    /// Data format or consistency error reported by the backend.
    #[error("data error: {0}")]
    DataError(String),

    /// A task needs a location but neither it nor its parent has been written.
    #[error("writable {0:?} has no resolvable file position")]
    UnresolvedPosition(WritableId),

    /// A write operation was staged against a handler that cannot write.
    #[error("operation {operation} is not permitted in {access} mode")]
    AccessDenied {
        /// The rejected operation.
        operation: Operation,
        /// Access mode of the handler.
        access: Access,
    },

    /// Tasks were staged against a handler after it was closed.
    #[error("IO handler is closed, {0} pending task(s) rejected")]
    HandlerClosed(usize),

    /// An output slot was read before the flush that fills it.
    #[error("output slot '{0}' read before it was filled")]
    SlotEmpty(&'static str),
}

/// Result type for IO operations.
pub type Result<T> = std::result::Result<T, Error>;
