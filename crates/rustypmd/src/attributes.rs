//! Attribute maps attached to every persistent entity.

use std::collections::{BTreeMap, BTreeSet};

use rustypmd_io::{AttrValue, FlushParams, Parameter, Slot, WritableId};

use crate::error::{Error, Result};
use crate::handle::IoHandle;

/// How values read from the backend combine with values held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Keep in-memory values; only add names not yet present.
    IgnoreExisting,
    /// Merge; the backend wins on conflict.
    OverrideExisting,
    /// Discard everything held in memory and take the backend's set.
    FullyReread,
}

/// Named attribute values with dirty tracking.
///
/// Only attributes set since the last flush are written on the next one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: BTreeMap<String, AttrValue>,
    dirty: BTreeSet<String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, marking it for writing on the next flush.
    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) {
        self.values.insert(name.to_string(), value.into());
        self.dirty.insert(name.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if some attribute awaits writing.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| Error::AttributeType {
            name: name.to_string(),
            expected: "f64",
            found: value.type_name(),
        })
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| Error::AttributeType {
            name: name.to_string(),
            expected: "string",
            found: value.type_name(),
        })
    }

    fn require(&self, name: &str) -> Result<&AttrValue> {
        self.values
            .get(name)
            .ok_or_else(|| Error::MissingAttribute(name.to_string()))
    }

    /// Stage WRITE_ATT for every dirty attribute.
    pub(crate) fn flush(&mut self, handle: &IoHandle, target: WritableId) {
        for name in std::mem::take(&mut self.dirty) {
            if let Some(value) = self.values.get(&name) {
                handle.stage(
                    target,
                    Parameter::WriteAttribute {
                        name,
                        value: value.clone(),
                    },
                );
            }
        }
    }

    /// Read every attribute of `target`. Flushes the queue twice: once to
    /// list names, once to fetch all values.
    pub(crate) fn read(&mut self, handle: &IoHandle, target: WritableId, mode: ReadMode) -> Result<()> {
        let names = Slot::new();
        handle.stage(target, Parameter::ListAttributes { names: names.clone() });
        handle.flush(&FlushParams::INTERNAL)?;

        let pending: Vec<(String, Slot<AttrValue>)> = names
            .take_required("attribute names")?
            .into_iter()
            .map(|name| {
                let value = Slot::new();
                handle.stage(
                    target,
                    Parameter::ReadAttribute {
                        name: name.clone(),
                        value: value.clone(),
                    },
                );
                (name, value)
            })
            .collect();
        handle.flush(&FlushParams::INTERNAL)?;

        let mut read = BTreeMap::new();
        for (name, value) in pending {
            read.insert(name, value.take_required("attribute value")?);
        }
        self.apply(read, mode);
        Ok(())
    }

    fn apply(&mut self, read: BTreeMap<String, AttrValue>, mode: ReadMode) {
        match mode {
            ReadMode::FullyReread => {
                self.values = read;
                self.dirty.clear();
            }
            ReadMode::OverrideExisting => {
                for (name, value) in read {
                    self.dirty.remove(&name);
                    self.values.insert(name, value);
                }
            }
            ReadMode::IgnoreExisting => {
                for (name, value) in read {
                    self.values.entry(name).or_insert(value);
                }
            }
        }
    }
}
