//! Records and their flush/read state machine.
//!
//! A record is either *scalar* (one unnamed component stored at the
//! record's own location) or *structured* (named components below a path
//! named after the record). What a flush stages is picked from a decision
//! table over access mode, shape and flush history; see [`flush_action`].

use std::collections::BTreeMap;
use std::fmt;

use rustypmd_io::{Access, Datatype, Extent, FilePosition, FlushParams, Parameter, Slot, WritableId};
use tracing::debug;

use crate::attributes::{Attributes, ReadMode};
use crate::component::RecordComponent;
use crate::error::{Error, Result};
use crate::handle::IoHandle;

/// Key of the single component of a scalar record.
pub const SCALAR: &str = "\u{b}Scalar";

/// Shape of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordShape {
    Scalar,
    Structured,
}

impl fmt::Display for RecordShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordShape::Scalar => f.write_str("scalar"),
            RecordShape::Structured => f.write_str("structured"),
        }
    }
}

/// Whether a record has been committed to the backend before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushHistory {
    First,
    Subsequent,
}

/// What one flush of a record stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushAction {
    /// Read-only: components are asked to flush, nothing structural is staged.
    PassThrough,
    /// Flush the component under the record's name, then copy its locator
    /// onto the record.
    DeclareScalar,
    /// Create the record path, then flush each component inside it.
    DeclareStructured,
    /// Flush the component and copy its (possibly moved) locator again.
    RefreshScalar,
    /// Flush each component; the path already exists.
    RefreshStructured,
}

impl FlushAction {
    /// True if the record's attributes are written after the components.
    pub fn writes_attributes(self) -> bool {
        self != FlushAction::PassThrough
    }
}

/// Decision table for one record flush.
pub fn flush_action(access: Access, shape: RecordShape, history: FlushHistory) -> FlushAction {
    use FlushAction::*;
    use FlushHistory::*;
    use RecordShape::*;

    if access.is_read_only() {
        return PassThrough;
    }
    match (shape, history) {
        (Scalar, First) => DeclareScalar,
        (Structured, First) => DeclareStructured,
        (Scalar, Subsequent) => RefreshScalar,
        (Structured, Subsequent) => RefreshStructured,
    }
}

/// A named dataset entity: scalar or a set of named components.
pub struct Record {
    handle: IoHandle,
    writable: WritableId,
    attributes: Attributes,
    components: BTreeMap<String, RecordComponent>,
    flushed_shape: Option<RecordShape>,
}

impl Record {
    pub(crate) fn new(handle: &IoHandle, parent: WritableId) -> Self {
        let mut attributes = Attributes::new();
        attributes.set("timeOffset", 0.0);
        Self {
            handle: handle.clone(),
            writable: handle.new_writable(Some(parent)),
            attributes,
            components: BTreeMap::new(),
            flushed_shape: None,
        }
    }

    pub(crate) fn writable(&self) -> WritableId {
        self.writable
    }

    /// Current in-memory shape, `None` while the record has no components.
    pub fn shape(&self) -> Option<RecordShape> {
        if self.components.is_empty() {
            None
        } else if self.components.contains_key(SCALAR) {
            Some(RecordShape::Scalar)
        } else {
            Some(RecordShape::Structured)
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.shape() == Some(RecordShape::Scalar)
    }

    /// Shape fixed by the first flush or read, if any.
    pub fn flushed_shape(&self) -> Option<RecordShape> {
        self.flushed_shape
    }

    /// The component of a scalar record, created if absent.
    pub fn scalar_mut(&mut self) -> Result<&mut RecordComponent> {
        if self.shape() == Some(RecordShape::Structured) {
            return Err(Error::MixedShape(RecordShape::Structured));
        }
        let parent = self.writable;
        let handle = &self.handle;
        Ok(self
            .components
            .entry(SCALAR.to_string())
            .or_insert_with(|| RecordComponent::new(handle, parent)))
    }

    pub fn scalar(&self) -> Option<&RecordComponent> {
        self.components.get(SCALAR)
    }

    /// The component `name` of a structured record, created if absent.
    pub fn component_mut(&mut self, name: &str) -> Result<&mut RecordComponent> {
        if name == SCALAR {
            return self.scalar_mut();
        }
        if self.shape() == Some(RecordShape::Scalar) {
            return Err(Error::MixedShape(RecordShape::Scalar));
        }
        let parent = self.writable;
        let handle = &self.handle;
        Ok(self
            .components
            .entry(name.to_string())
            .or_insert_with(|| RecordComponent::new(handle, parent)))
    }

    pub fn component(&self, name: &str) -> Option<&RecordComponent> {
        self.components.get(name)
    }

    /// Component names in ascending order. A scalar record yields [`SCALAR`].
    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn components(&self) -> impl Iterator<Item = (&str, &RecordComponent)> {
        self.components.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Drop a component from memory. Backend content is untouched.
    pub fn remove_component(&mut self, name: &str) -> Option<RecordComponent> {
        self.components.remove(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn time_offset(&self) -> Result<f64> {
        self.attributes.get_f64("timeOffset")
    }

    pub fn set_time_offset(&mut self, offset: f64) -> &mut Self {
        self.attributes.set("timeOffset", offset);
        self
    }

    pub fn is_written(&self) -> bool {
        self.handle.written(self.writable)
    }

    pub fn file_position(&self) -> Option<FilePosition> {
        self.handle.position(self.writable)
    }

    /// Stage this record's operations under `name`.
    pub(crate) fn flush(&mut self, name: &str, params: &FlushParams) -> Result<()> {
        let shape = self
            .shape()
            .ok_or_else(|| Error::EmptyRecord(name.to_string()))?;
        if let Some(flushed) = self.flushed_shape {
            if flushed != shape {
                return Err(Error::ShapeChanged {
                    record: name.to_string(),
                    flushed,
                    requested: shape,
                });
            }
        }
        let history = if self.is_written() {
            FlushHistory::Subsequent
        } else {
            FlushHistory::First
        };
        let action = flush_action(self.handle.access(), shape, history);
        debug!(record = name, ?action, "flushing record");

        match action {
            FlushAction::PassThrough => {
                for (key, component) in &mut self.components {
                    component.flush(key, params)?;
                }
            }
            FlushAction::DeclareScalar | FlushAction::RefreshScalar => {
                let record_parent = self.handle.parent(self.writable);
                let Some(component) = self.components.get_mut(SCALAR) else {
                    return Err(Error::EmptyRecord(name.to_string()));
                };
                if action == FlushAction::DeclareScalar {
                    self.handle.set_parent(component.writable(), record_parent);
                }
                component.flush(name, params)?;
                self.handle.stage(
                    self.writable,
                    Parameter::KeepSynchronous {
                        other: component.writable(),
                    },
                );
            }
            FlushAction::DeclareStructured => {
                self.handle.stage(
                    self.writable,
                    Parameter::CreatePath {
                        path: name.to_string(),
                    },
                );
                for (key, component) in &mut self.components {
                    self.handle.set_parent(component.writable(), Some(self.writable));
                    component.flush(key, params)?;
                }
            }
            FlushAction::RefreshStructured => {
                for (key, component) in &mut self.components {
                    component.flush(key, params)?;
                }
            }
        }

        if action.writes_attributes() {
            self.attributes.flush(&self.handle, self.writable);
            self.flushed_shape = Some(shape);
        }
        Ok(())
    }

    /// Discover this record's components. The record itself must already
    /// be opened; a scalar record must already hold its component.
    pub(crate) fn read(&mut self) -> Result<()> {
        if let Some(component) = self.components.get_mut(SCALAR) {
            component.read()?;
            self.flushed_shape = Some(RecordShape::Scalar);
        } else {
            self.read_structured()?;
            self.flushed_shape = Some(RecordShape::Structured);
        }
        self.attributes
            .read(&self.handle, self.writable, ReadMode::FullyReread)
    }

    fn read_structured(&mut self) -> Result<()> {
        // Sub-paths are constant components.
        let paths = Slot::new();
        self.handle
            .stage(self.writable, Parameter::ListPaths { paths: paths.clone() });
        self.handle.flush(&FlushParams::INTERNAL)?;
        for name in paths.take_required("component paths")? {
            let component = self.entry(&name);
            component.mark_constant();
            let id = component.writable();
            self.handle.stage(id, Parameter::OpenPath { path: name.clone() });
            self.handle.flush(&FlushParams::INTERNAL)?;
            self.entry(&name).read()?;
        }

        let datasets = Slot::new();
        self.handle.stage(
            self.writable,
            Parameter::ListDatasets {
                datasets: datasets.clone(),
            },
        );
        self.handle.flush(&FlushParams::INTERNAL)?;
        for name in datasets.take_required("component datasets")? {
            let id = self.entry(&name).writable();
            let (dtype, extent) = open_dataset(&self.handle, id, &name)?;
            let component = self.entry(&name);
            component.redefine_dataset(dtype, extent)?;
            component.read()?;
        }
        debug!(components = self.components.len(), "read structured record");
        Ok(())
    }

    fn entry(&mut self, name: &str) -> &mut RecordComponent {
        let parent = self.writable;
        let handle = &self.handle;
        self.components
            .entry(name.to_string())
            .or_insert_with(|| RecordComponent::new(handle, parent))
    }

    /// Install the component of a scalar record found during container
    /// discovery. Its parent is the record's parent: both denote the same
    /// backend object.
    pub(crate) fn insert_scalar(&mut self) -> &mut RecordComponent {
        let parent = self.handle.parent(self.writable).unwrap_or(self.writable);
        let handle = &self.handle;
        self.components
            .entry(SCALAR.to_string())
            .or_insert_with(|| RecordComponent::new(handle, parent))
    }
}

/// Stage OPEN_DATASET for `name` on `target`, flush, and return what the
/// backend reported.
pub(crate) fn open_dataset(handle: &IoHandle, target: WritableId, name: &str) -> Result<(Datatype, Extent)> {
    let dtype = Slot::new();
    let extent = Slot::new();
    handle.stage(
        target,
        Parameter::OpenDataset {
            name: name.to_string(),
            dtype: dtype.clone(),
            extent: extent.clone(),
        },
    );
    handle.flush(&FlushParams::INTERNAL)?;
    Ok((
        dtype.take_required("dataset type")?,
        extent.take_required("dataset extent")?,
    ))
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("writable", &self.writable)
            .field("shape", &self.shape())
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .finish()
    }
}
