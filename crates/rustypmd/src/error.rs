//! Error types for the object model.

use rustypmd_io::{Access, Datatype};
use thiserror::Error;

use crate::record::RecordShape;

/// Errors raised by series, iterations, records and the iterator.
#[derive(Debug, Error)]
pub enum Error {
    /// A staged task failed while the queue was flushed, or the queue
    /// itself was misused (closed handler, read-only handler, early slot read).
    #[error(transparent)]
    Backend(#[from] rustypmd_io::Error),

    /// The iteration was closed and cannot be reopened.
    #[error("iteration {0} is closed")]
    IterationClosed(u64),

    /// No iteration with this index exists.
    #[error("iteration {0} not found")]
    IterationNotFound(u64),

    /// A record is flushed in a different shape than it was first flushed in.
    #[error("record '{record}' was flushed as {flushed} and cannot become {requested}")]
    ShapeChanged {
        record: String,
        flushed: RecordShape,
        requested: RecordShape,
    },

    /// Scalar and named components were mixed within one record.
    #[error("record already holds {0} components")]
    MixedShape(RecordShape),

    /// A record without components was flushed.
    #[error("record '{0}' has no components")]
    EmptyRecord(String),

    /// A modification was attempted through a read-only series.
    #[error("series is opened {0}, modification rejected")]
    ReadOnly(Access),

    /// The end iterator was dereferenced or advanced.
    #[error("end iterator cannot be dereferenced or advanced")]
    EndIterator,

    /// An iterator was used with a series other than the one it was created for.
    #[error("iterator used with a different series")]
    ForeignSeries,

    /// Dataset declaration or selection is inconsistent.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// Element type of a chunk does not match the declared dataset.
    #[error("{found} chunk does not match {expected} dataset")]
    DatatypeMismatch { expected: Datatype, found: Datatype },

    /// A required attribute is absent.
    #[error("missing attribute '{0}'")]
    MissingAttribute(String),

    /// An attribute holds a value of the wrong type.
    #[error("attribute '{name}' holds {found}, expected {expected}")]
    AttributeType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The series uses an iteration encoding other than group-based.
    #[error("unsupported iteration encoding '{0}'")]
    UnsupportedEncoding(String),

    /// Series options are inconsistent.
    #[error("invalid series options: {0}")]
    InvalidOptions(String),

    /// Options document could not be parsed.
    #[error("options JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for object-model operations.
pub type Result<T> = std::result::Result<T, Error>;
