//! Staged operations and their output slots.
//!
//! An [`IoTask`] binds one [`Parameter`] bundle to the writable it targets.
//! Tasks are queued on the [`IoHandler`](crate::IoHandler) and consumed
//! exactly once by a flush. Results come back through [`Slot`]s, which the
//! caller keeps a clone of and reads after the flush returns.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::types::{AttrValue, Datatype, Extent};
use crate::writable::WritableId;

/// Tag of a staged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreatePath,
    ListPaths,
    OpenPath,
    CreateDataset,
    ExtendDataset,
    ListDatasets,
    OpenDataset,
    WriteDataset,
    ReadDataset,
    WriteAttribute,
    ReadAttribute,
    ListAttributes,
    KeepSynchronous,
    Advance,
}

impl Operation {
    /// Returns true for operations that modify backend content.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Operation::CreatePath
                | Operation::CreateDataset
                | Operation::ExtendDataset
                | Operation::WriteDataset
                | Operation::WriteAttribute
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::CreatePath => "CREATE_PATH",
            Operation::ListPaths => "LIST_PATHS",
            Operation::OpenPath => "OPEN_PATH",
            Operation::CreateDataset => "CREATE_DATASET",
            Operation::ExtendDataset => "EXTEND_DATASET",
            Operation::ListDatasets => "LIST_DATASETS",
            Operation::OpenDataset => "OPEN_DATASET",
            Operation::WriteDataset => "WRITE_DATASET",
            Operation::ReadDataset => "READ_DATASET",
            Operation::WriteAttribute => "WRITE_ATT",
            Operation::ReadAttribute => "READ_ATT",
            Operation::ListAttributes => "LIST_ATTS",
            Operation::KeepSynchronous => "KEEP_SYNCHRONOUS",
            Operation::Advance => "ADVANCE",
        };
        f.write_str(name)
    }
}

/// Shared, optional-valued output of a task.
///
/// Cloning a slot shares the underlying cell: the backend fills the copy
/// held by the task and the caller reads its own copy after the flush.
pub struct Slot<T>(Rc<RefCell<Option<T>>>);

impl<T> Slot<T> {
    pub fn new() -> Self {
        Slot(Rc::new(RefCell::new(None)))
    }

    /// Store a result. Called by backends.
    pub fn fill(&self, value: T) {
        *self.0.borrow_mut() = Some(value);
    }

    pub fn is_filled(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// Take the result, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.0.borrow_mut().take()
    }

    /// Take a result the backend was required to produce.
    ///
    /// An empty slot here means the caller read it before the flush that
    /// executes its task.
    pub fn take_required(&self, what: &'static str) -> Result<T> {
        self.take().ok_or(Error::SlotEmpty(what))
    }
}

impl<T: Clone> Slot<T> {
    /// Copy of the current result, if any.
    pub fn get(&self) -> Option<T> {
        self.0.borrow().clone()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Slot(Rc::clone(&self.0))
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&self.0.borrow()).finish()
    }
}

/// Direction of a step transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvanceMode {
    BeginStep,
    EndStep,
}

/// Outcome of an [`Operation::Advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvanceStatus {
    /// A step was begun or ended.
    Ok,
    /// The stream has no further steps.
    Over,
    /// The backend has no steps; all content is visible at once.
    RandomAccess,
}

/// Typed parameter and output bundle of a task.
#[derive(Debug, Clone)]
pub enum Parameter {
    CreatePath {
        path: String,
    },
    ListPaths {
        paths: Slot<Vec<String>>,
    },
    OpenPath {
        path: String,
    },
    CreateDataset {
        name: String,
        dtype: Datatype,
        extent: Extent,
    },
    /// Grow an existing dataset to `extent`, keeping its contents.
    ExtendDataset {
        extent: Extent,
    },
    ListDatasets {
        datasets: Slot<Vec<String>>,
    },
    OpenDataset {
        name: String,
        dtype: Slot<Datatype>,
        extent: Slot<Extent>,
    },
    WriteDataset {
        offset: Extent,
        extent: Extent,
        dtype: Datatype,
        data: Vec<u8>,
    },
    ReadDataset {
        offset: Extent,
        extent: Extent,
        dtype: Datatype,
        data: Slot<Vec<u8>>,
    },
    WriteAttribute {
        name: String,
        value: AttrValue,
    },
    ReadAttribute {
        name: String,
        value: Slot<AttrValue>,
    },
    ListAttributes {
        names: Slot<Vec<String>>,
    },
    /// Copy the locator of `other` onto the task's target.
    KeepSynchronous {
        other: WritableId,
    },
    Advance {
        mode: AdvanceMode,
        status: Slot<AdvanceStatus>,
        /// Iteration indices of the newly begun step, when the backend knows them.
        iterations: Slot<Vec<u64>>,
    },
}

impl Parameter {
    pub fn operation(&self) -> Operation {
        match self {
            Parameter::CreatePath { .. } => Operation::CreatePath,
            Parameter::ListPaths { .. } => Operation::ListPaths,
            Parameter::OpenPath { .. } => Operation::OpenPath,
            Parameter::CreateDataset { .. } => Operation::CreateDataset,
            Parameter::ExtendDataset { .. } => Operation::ExtendDataset,
            Parameter::ListDatasets { .. } => Operation::ListDatasets,
            Parameter::OpenDataset { .. } => Operation::OpenDataset,
            Parameter::WriteDataset { .. } => Operation::WriteDataset,
            Parameter::ReadDataset { .. } => Operation::ReadDataset,
            Parameter::WriteAttribute { .. } => Operation::WriteAttribute,
            Parameter::ReadAttribute { .. } => Operation::ReadAttribute,
            Parameter::ListAttributes { .. } => Operation::ListAttributes,
            Parameter::KeepSynchronous { .. } => Operation::KeepSynchronous,
            Parameter::Advance { .. } => Operation::Advance,
        }
    }
}

/// One-shot unit of staged work.
#[derive(Debug, Clone)]
pub struct IoTask {
    writable: WritableId,
    parameter: Parameter,
}

impl IoTask {
    pub fn new(writable: WritableId, parameter: Parameter) -> Self {
        Self {
            writable,
            parameter,
        }
    }

    /// The writable this task targets.
    pub fn writable(&self) -> WritableId {
        self.writable
    }

    pub fn parameter(&self) -> &Parameter {
        &self.parameter
    }

    pub fn operation(&self) -> Operation {
        self.parameter.operation()
    }
}
