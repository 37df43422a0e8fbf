//! Backend-agnostic object model for openPMD-style series.
//!
//! A [`Series`] owns iterations; an [`Iteration`] owns mesh and particle
//! [`RecordContainer`]s; a [`Record`] is either scalar or a set of named
//! [`RecordComponent`]s. Nothing touches storage until a flush: every
//! entity stages tasks on the series' IO handler (see `rustypmd_io`), and
//! [`Series::flush`] executes them against the backend in order.
//!
//! Reading walks the series with [`Series::read_iterations`], which works
//! the same on random-access and step-based streaming backends.
//!
//! # Example
//!
//! ```
//! use rustypmd::{Access, Dataset, MemoryBackend, MemoryStore, Series, SeriesOptions};
//!
//! let store = MemoryStore::new();
//! let mut series = Series::new(MemoryBackend::new(store.clone()), SeriesOptions::new(Access::Create))?;
//! let e = series.iteration_mut(100)?.meshes_mut().record_mut("E")?;
//! for axis in ["x", "y", "z"] {
//!     e.component_mut(axis)?.reset_dataset(Dataset::of::<f32>(&[16]))?;
//! }
//! series.close()?;
//!
//! let mut series = Series::new(MemoryBackend::new(store), SeriesOptions::new(Access::ReadOnly))?;
//! let iteration = series.open_iteration(100)?;
//! let e = iteration.meshes().get("E").expect("record E");
//! assert_eq!(e.component_names().collect::<Vec<_>>(), ["x", "y", "z"]);
//! # Ok::<(), rustypmd::Error>(())
//! ```

pub mod attributes;
pub mod component;
pub mod config;
pub mod container;
pub mod error;
mod handle;
pub mod iteration;
pub mod read_iterations;
pub mod record;
pub mod series;

pub use attributes::{Attributes, ReadMode};
pub use component::{Chunk, Dataset, RecordComponent};
pub use config::SeriesOptions;
pub use container::RecordContainer;
pub use error::{Error, Result};
pub use iteration::{CloseStatus, IndexedIteration, Iteration};
pub use read_iterations::{ReadIterations, SeriesIterator};
pub use record::{flush_action, FlushAction, FlushHistory, Record, RecordShape, SCALAR};
pub use series::{AnomalyKind, Series, SeriesId, StreamAnomaly};

pub use rustypmd_io::{
    Access, AttrValue, Backend, Datatype, Element, FilePosition, FlushLevel, FlushParams,
    MemoryBackend, MemoryStore,
};
