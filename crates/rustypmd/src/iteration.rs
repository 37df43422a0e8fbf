//! Iterations: one time snapshot of a series.

use std::fmt;
use std::ops::{Deref, DerefMut};

use rustypmd_io::{FilePosition, FlushParams, Parameter, Slot, WritableId};
use tracing::debug;

use crate::attributes::{Attributes, ReadMode};
use crate::config::SeriesOptions;
use crate::container::RecordContainer;
use crate::error::Result;
use crate::handle::IoHandle;

/// Lifecycle of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseStatus {
    /// Discovered in the backend, not yet read.
    ParseDeferred,
    /// Open for reading or writing.
    Open,
    /// Closed; no further operations are accepted.
    Closed,
}

/// One time snapshot holding mesh and particle records.
pub struct Iteration {
    handle: IoHandle,
    writable: WritableId,
    attributes: Attributes,
    meshes: RecordContainer,
    particles: RecordContainer,
    status: CloseStatus,
}

impl Iteration {
    pub(crate) fn new(handle: &IoHandle, parent: WritableId, status: CloseStatus) -> Self {
        let writable = handle.new_writable(Some(parent));
        let mut attributes = Attributes::new();
        attributes.set("time", 0.0);
        attributes.set("dt", 1.0);
        attributes.set("timeUnitSI", 1.0);
        Self {
            handle: handle.clone(),
            writable,
            attributes,
            meshes: RecordContainer::new(handle, writable),
            particles: RecordContainer::new(handle, writable),
            status,
        }
    }

    pub fn close_status(&self) -> CloseStatus {
        self.status
    }

    pub fn is_closed(&self) -> bool {
        self.status == CloseStatus::Closed
    }

    pub(crate) fn set_status(&mut self, status: CloseStatus) {
        self.status = status;
    }

    pub fn meshes(&self) -> &RecordContainer {
        &self.meshes
    }

    pub fn meshes_mut(&mut self) -> &mut RecordContainer {
        &mut self.meshes
    }

    pub fn particles(&self) -> &RecordContainer {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut RecordContainer {
        &mut self.particles
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn time(&self) -> Result<f64> {
        self.attributes.get_f64("time")
    }

    pub fn set_time(&mut self, time: f64) -> &mut Self {
        self.attributes.set("time", time);
        self
    }

    pub fn dt(&self) -> Result<f64> {
        self.attributes.get_f64("dt")
    }

    pub fn set_dt(&mut self, dt: f64) -> &mut Self {
        self.attributes.set("dt", dt);
        self
    }

    pub fn time_unit_si(&self) -> Result<f64> {
        self.attributes.get_f64("timeUnitSI")
    }

    pub fn set_time_unit_si(&mut self, unit: f64) -> &mut Self {
        self.attributes.set("timeUnitSI", unit);
        self
    }

    pub fn file_position(&self) -> Option<FilePosition> {
        self.handle.position(self.writable)
    }

    pub(crate) fn flush(&mut self, index: u64, options: &SeriesOptions, params: &FlushParams) -> Result<()> {
        let writable = self.handle.access().is_writable();
        if writable && !self.handle.written(self.writable) {
            self.handle.stage(
                self.writable,
                Parameter::CreatePath {
                    path: index.to_string(),
                },
            );
        }
        self.meshes.flush(options.meshes_group(), params)?;
        self.particles.flush(options.particles_group(), params)?;
        if writable {
            self.attributes.flush(&self.handle, self.writable);
        }
        Ok(())
    }

    /// Open and read this iteration from the backend.
    pub(crate) fn read(&mut self, index: u64, options: &SeriesOptions) -> Result<()> {
        self.handle.stage(
            self.writable,
            Parameter::OpenPath {
                path: index.to_string(),
            },
        );
        self.handle.flush(&FlushParams::INTERNAL)?;
        self.attributes
            .read(&self.handle, self.writable, ReadMode::FullyReread)?;

        let paths = Slot::new();
        self.handle
            .stage(self.writable, Parameter::ListPaths { paths: paths.clone() });
        self.handle.flush(&FlushParams::INTERNAL)?;
        let paths = paths.take_required("iteration paths")?;

        let groups = [
            (options.meshes_group(), &mut self.meshes),
            (options.particles_group(), &mut self.particles),
        ];
        for (group, container) in groups {
            if !paths.iter().any(|p| p == group) {
                continue;
            }
            self.handle.stage(
                container.writable(),
                Parameter::OpenPath {
                    path: group.to_string(),
                },
            );
            self.handle.flush(&FlushParams::INTERNAL)?;
            container.read()?;
        }
        self.status = CloseStatus::Open;
        debug!(
            index,
            meshes = self.meshes.len(),
            particles = self.particles.len(),
            "read iteration"
        );
        Ok(())
    }
}

impl fmt::Debug for Iteration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iteration")
            .field("status", &self.status)
            .field("meshes", &self.meshes.names().collect::<Vec<_>>())
            .field("particles", &self.particles.names().collect::<Vec<_>>())
            .finish()
    }
}

/// An iteration together with the index it was retrieved under.
pub struct IndexedIteration<'a> {
    /// Index of the iteration in its series.
    pub index: u64,
    iteration: &'a mut Iteration,
}

impl<'a> IndexedIteration<'a> {
    pub(crate) fn new(index: u64, iteration: &'a mut Iteration) -> Self {
        Self { index, iteration }
    }
}

impl Deref for IndexedIteration<'_> {
    type Target = Iteration;

    fn deref(&self) -> &Iteration {
        self.iteration
    }
}

impl DerefMut for IndexedIteration<'_> {
    fn deref_mut(&mut self) -> &mut Iteration {
        self.iteration
    }
}

impl fmt::Debug for IndexedIteration<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedIteration")
            .field("index", &self.index)
            .field("iteration", &self.iteration)
            .finish()
    }
}
