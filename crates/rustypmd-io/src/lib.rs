//! Deferred IO layer for openPMD-style series.
//!
//! The object model in `rustypmd` never touches storage directly. It
//! stages [`IoTask`]s on an [`IoHandler`], and a flush hands them to a
//! [`Backend`] in the order they were staged.
//!
//! - [`task`]: operation tags, parameter bundles, output [`Slot`]s
//! - [`handler`]: FIFO queue and flush protocol
//! - [`backend`]: driver trait with per-operation default implementations
//! - [`writable`]: arena of written/locator/parent records
//! - [`memory`]: in-memory reference driver with step support
//! - [`types`]: access modes, flush levels, datatypes, attribute values

pub mod backend;
pub mod error;
pub mod handler;
pub mod memory;
pub mod task;
pub mod types;
pub mod writable;

pub use backend::{Backend, Capability, ExecContext};
pub use error::{Error, Result};
pub use handler::IoHandler;
pub use memory::{JournalEntry, MemoryBackend, MemoryStore};
pub use task::{AdvanceMode, AdvanceStatus, IoTask, Operation, Parameter, Slot};
pub use types::{
    byte_len, datatype_of_attr, num_elements, Access, AttrValue, Datatype, Element, Extent,
    FlushLevel, FlushParams,
};
pub use writable::{FilePosition, WritableId, Writable, Writables};
