//! Named record collections of an iteration (meshes, particles).

use std::collections::BTreeMap;

use rustypmd_io::{FlushParams, Parameter, Slot, WritableId};
use tracing::debug;

use crate::error::{Error, Result};
use crate::handle::IoHandle;
use crate::record::{open_dataset, Record};

/// Mapping of record name to [`Record`], stored below one path.
pub struct RecordContainer {
    handle: IoHandle,
    writable: WritableId,
    records: BTreeMap<String, Record>,
}

impl RecordContainer {
    pub(crate) fn new(handle: &IoHandle, parent: WritableId) -> Self {
        Self {
            handle: handle.clone(),
            writable: handle.new_writable(Some(parent)),
            records: BTreeMap::new(),
        }
    }

    pub(crate) fn writable(&self) -> WritableId {
        self.writable
    }

    /// Record `name`, created if absent. Creation needs write access.
    pub fn record_mut(&mut self, name: &str) -> Result<&mut Record> {
        if !self.records.contains_key(name) {
            let access = self.handle.access();
            if access.is_read_only() {
                return Err(Error::ReadOnly(access));
            }
        }
        let handle = &self.handle;
        let parent = self.writable;
        Ok(self
            .records
            .entry(name.to_string())
            .or_insert_with(|| Record::new(handle, parent)))
    }

    pub fn get(&self, name: &str) -> Option<&Record> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Record> {
        self.records.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Drop a record from memory. Backend content is untouched.
    pub fn remove(&mut self, name: &str) -> Option<Record> {
        self.records.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stage the container below `path`. Empty containers stage nothing.
    pub(crate) fn flush(&mut self, path: &str, params: &FlushParams) -> Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }
        if self.handle.access().is_writable() && !self.handle.written(self.writable) {
            self.handle.stage(
                self.writable,
                Parameter::CreatePath {
                    path: path.to_string(),
                },
            );
        }
        for (name, record) in &mut self.records {
            record.flush(name, params)?;
        }
        Ok(())
    }

    /// Discover the records of an opened container.
    ///
    /// Sub-paths carrying both `value` and `shape` attributes are constant
    /// scalar records; other sub-paths are structured records. Datasets
    /// are scalar records.
    pub(crate) fn read(&mut self) -> Result<()> {
        let paths = Slot::new();
        self.handle
            .stage(self.writable, Parameter::ListPaths { paths: paths.clone() });
        self.handle.flush(&FlushParams::INTERNAL)?;
        for name in paths.take_required("record paths")? {
            let record = self.entry(&name);
            let id = record.writable();
            let attributes = Slot::new();
            self.handle.stage(id, Parameter::OpenPath { path: name.clone() });
            self.handle.stage(
                id,
                Parameter::ListAttributes {
                    names: attributes.clone(),
                },
            );
            self.handle.flush(&FlushParams::INTERNAL)?;
            let attributes = attributes.take_required("record attributes")?;
            let is_constant = ["value", "shape"]
                .iter()
                .all(|key| attributes.iter().any(|a| a == key));

            let record = self.entry(&name);
            if is_constant {
                let component = record.insert_scalar();
                component.mark_constant();
                let component_id = component.writable();
                self.handle
                    .stage(component_id, Parameter::OpenPath { path: name.clone() });
                self.handle.flush(&FlushParams::INTERNAL)?;
            }
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
        for name in datasets.take_required("record datasets")? {
            let record = self.entry(&name);
            let record_id = record.writable();
            let component_id = record.insert_scalar().writable();
            let (dtype, extent) = open_dataset(&self.handle, record_id, &name)?;
            self.handle.stage(
                component_id,
                Parameter::KeepSynchronous { other: record_id },
            );
            self.handle.flush(&FlushParams::INTERNAL)?;

            let record = self.entry(&name);
            record.insert_scalar().redefine_dataset(dtype, extent)?;
            record.read()?;
        }
        debug!(records = self.records.len(), "read record container");
        Ok(())
    }

    fn entry(&mut self, name: &str) -> &mut Record {
        let handle = &self.handle;
        let parent = self.writable;
        self.records
            .entry(name.to_string())
            .or_insert_with(|| Record::new(handle, parent))
    }
}
