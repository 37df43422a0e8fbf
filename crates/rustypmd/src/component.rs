//! Record components: one typed, extent-described leaf dataset each.

use std::fmt;
use std::marker::PhantomData;

use rustypmd_io::{
    datatype_of_attr, num_elements, AttrValue, Datatype, Element, Extent, FilePosition,
    FlushParams, Parameter, Slot, WritableId,
};
use tracing::trace;

use crate::attributes::{Attributes, ReadMode};
use crate::error::{Error, Result};
use crate::handle::IoHandle;

/// Element type and extent of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub dtype: Datatype,
    pub extent: Extent,
}

impl Dataset {
    pub fn new(dtype: Datatype, extent: &[u64]) -> Self {
        Self {
            dtype,
            extent: extent.to_vec(),
        }
    }

    /// Dataset holding elements of type `T`.
    pub fn of<T: Element>(extent: &[u64]) -> Self {
        Self::new(T::DATATYPE, extent)
    }

    pub fn rank(&self) -> usize {
        self.extent.len()
    }

    /// Check that `offset`/`extent` selects a region inside this dataset.
    fn check_selection(&self, offset: &[u64], extent: &[u64]) -> Result<()> {
        if offset.len() != self.rank() || extent.len() != self.rank() {
            return Err(Error::InvalidDataset(format!(
                "selection of rank {} on dataset of rank {}",
                extent.len(),
                self.rank()
            )));
        }
        let fits = offset
            .iter()
            .zip(extent)
            .zip(&self.extent)
            .all(|((o, e), d)| o.checked_add(*e).is_some_and(|end| end <= *d));
        if !fits {
            return Err(Error::InvalidDataset(format!(
                "selection {offset:?}+{extent:?} exceeds extent {:?}",
                self.extent
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ChunkWrite {
    offset: Extent,
    extent: Extent,
    dtype: Datatype,
    data: Vec<u8>,
}

/// A chunk requested by [`RecordComponent::load_chunk`].
///
/// Data arrives when the series is flushed; constant components answer
/// immediately.
pub struct Chunk<T> {
    source: ChunkSource,
    _marker: PhantomData<T>,
}

enum ChunkSource {
    Ready(Vec<u8>),
    Pending(Slot<Vec<u8>>),
}

impl<T: Element> Chunk<T> {
    fn ready(values: &[T]) -> Self {
        Self {
            source: ChunkSource::Ready(T::encode(values)),
            _marker: PhantomData,
        }
    }

    fn pending(slot: Slot<Vec<u8>>) -> Self {
        Self {
            source: ChunkSource::Pending(slot),
            _marker: PhantomData,
        }
    }

    /// True once the data is available.
    pub fn is_ready(&self) -> bool {
        match &self.source {
            ChunkSource::Ready(_) => true,
            ChunkSource::Pending(slot) => slot.is_filled(),
        }
    }

    /// Decode the chunk. Fails if the series has not been flushed since
    /// the chunk was requested.
    pub fn into_vec(self) -> Result<Vec<T>> {
        let bytes = match self.source {
            ChunkSource::Ready(bytes) => bytes,
            ChunkSource::Pending(slot) => slot.take_required("chunk data")?,
        };
        Ok(T::decode(&bytes))
    }
}

impl<T> fmt::Debug for Chunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.source {
            ChunkSource::Ready(_) => "ready",
            ChunkSource::Pending(slot) if slot.is_filled() => "filled",
            ChunkSource::Pending(_) => "pending",
        };
        f.debug_struct("Chunk").field("state", &state).finish()
    }
}

/// One leaf dataset of a record.
pub struct RecordComponent {
    handle: IoHandle,
    writable: WritableId,
    attributes: Attributes,
    dataset: Option<Dataset>,
    constant: bool,
    value: Option<AttrValue>,
    chunks: Vec<ChunkWrite>,
    /// A written dataset was declared with a larger extent.
    extended: bool,
}

impl RecordComponent {
    pub(crate) fn new(handle: &IoHandle, parent: WritableId) -> Self {
        let mut attributes = Attributes::new();
        attributes.set("unitSI", 1.0);
        Self {
            handle: handle.clone(),
            writable: handle.new_writable(Some(parent)),
            attributes,
            dataset: None,
            constant: false,
            value: None,
            chunks: Vec::new(),
            extended: false,
        }
    }

    pub(crate) fn writable(&self) -> WritableId {
        self.writable
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub fn dtype(&self) -> Option<Datatype> {
        self.dataset.as_ref().map(|d| d.dtype)
    }

    pub fn extent(&self) -> Option<&[u64]> {
        self.dataset.as_ref().map(|d| d.extent.as_slice())
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Value of a constant component.
    pub fn constant_value(&self) -> Option<&AttrValue> {
        self.value.as_ref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn unit_si(&self) -> Result<f64> {
        self.attributes.get_f64("unitSI")
    }

    pub fn set_unit_si(&mut self, unit: f64) -> &mut Self {
        self.attributes.set("unitSI", unit);
        self
    }

    pub fn is_written(&self) -> bool {
        self.handle.written(self.writable)
    }

    /// Backend locator, once written.
    pub fn file_position(&self) -> Option<FilePosition> {
        self.handle.position(self.writable)
    }

    /// Declare element type and extent.
    ///
    /// Once the component is written, its element type and rank are fixed
    /// and its extent can only grow. Growth reaches the backend on the
    /// next flush.
    pub fn reset_dataset(&mut self, dataset: Dataset) -> Result<&mut Self> {
        self.require_writable()?;
        self.declare(dataset)?;
        Ok(self)
    }

    fn declare(&mut self, dataset: Dataset) -> Result<()> {
        if self.is_written() {
            if let Some(old) = &self.dataset {
                if old.dtype != dataset.dtype {
                    return Err(Error::DatatypeMismatch {
                        expected: old.dtype,
                        found: dataset.dtype,
                    });
                }
                if old.rank() != dataset.rank() {
                    return Err(Error::InvalidDataset(format!(
                        "rank of a written dataset cannot change from {} to {}",
                        old.rank(),
                        dataset.rank()
                    )));
                }
                if old.extent.iter().zip(&dataset.extent).any(|(o, n)| n < o) {
                    return Err(Error::InvalidDataset(format!(
                        "written dataset cannot shrink from {:?} to {:?}",
                        old.extent, dataset.extent
                    )));
                }
                if old.extent != dataset.extent && !self.constant {
                    self.extended = true;
                }
            }
        }
        if self.constant {
            self.attributes
                .set("shape", AttrValue::U64Array(dataset.extent.clone()));
        }
        self.dataset = Some(dataset);
        Ok(())
    }

    /// Re-declare a dataset that already exists in the backend.
    ///
    /// The component is treated as not yet written for the duration of
    /// the call and is written again on return, whatever the outcome.
    pub(crate) fn redefine_dataset(&mut self, dtype: Datatype, extent: Extent) -> Result<()> {
        self.handle.set_written(self.writable, false);
        let result = self.declare(Dataset::new(dtype, &extent));
        self.handle.set_written(self.writable, true);
        result
    }

    /// Turn this component into a constant: every element equals `value`
    /// and no payload is stored.
    pub fn make_constant<T: Element>(&mut self, value: T, extent: &[u64]) -> Result<&mut Self> {
        self.require_writable()?;
        if self.is_written() && !self.constant {
            return Err(Error::InvalidDataset(
                "a written dataset cannot become constant".to_string(),
            ));
        }
        self.constant = true;
        self.value = Some(value.to_attr());
        self.attributes.set("value", value.to_attr());
        self.declare(Dataset::of::<T>(extent))?;
        Ok(self)
    }

    /// Queue `data` for writing at `offset`. Written on the next flush.
    pub fn store_chunk<T: Element>(&mut self, data: &[T], offset: &[u64], extent: &[u64]) -> Result<()> {
        self.require_writable()?;
        if self.constant {
            return Err(Error::InvalidDataset(
                "constant components carry no payload".to_string(),
            ));
        }
        let dataset = self.checked_dataset::<T>(offset, extent)?;
        let count = num_elements(extent)
            .ok_or_else(|| Error::InvalidDataset(format!("selection {extent:?} is too large")))?;
        if data.len() as u64 != count {
            return Err(Error::InvalidDataset(format!(
                "chunk holds {} elements, selection covers {count}",
                data.len()
            )));
        }
        let dtype = dataset.dtype;
        self.chunks.push(ChunkWrite {
            offset: offset.to_vec(),
            extent: extent.to_vec(),
            dtype,
            data: T::encode(data),
        });
        Ok(())
    }

    /// Request the region `offset`/`extent`. Data arrives on the next flush.
    pub fn load_chunk<T: Element>(&self, offset: &[u64], extent: &[u64]) -> Result<Chunk<T>> {
        if self.constant {
            let value = self
                .value
                .as_ref()
                .and_then(T::from_attr)
                .ok_or_else(|| Error::MissingAttribute("value".to_string()))?;
            self.checked_dataset::<T>(offset, extent)?;
            let count = num_elements(extent)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| Error::InvalidDataset(format!("selection {extent:?} is too large")))?;
            let values = vec![value; count];
            return Ok(Chunk::ready(&values));
        }
        let dataset = self.checked_dataset::<T>(offset, extent)?;
        if !self.is_written() {
            return Err(Error::InvalidDataset(
                "dataset has not been written yet".to_string(),
            ));
        }
        let slot = Slot::new();
        self.handle.stage(
            self.writable,
            Parameter::ReadDataset {
                offset: offset.to_vec(),
                extent: extent.to_vec(),
                dtype: dataset.dtype,
                data: slot.clone(),
            },
        );
        Ok(Chunk::pending(slot))
    }

    fn checked_dataset<T: Element>(&self, offset: &[u64], extent: &[u64]) -> Result<&Dataset> {
        let dataset = self
            .dataset
            .as_ref()
            .ok_or_else(|| Error::InvalidDataset("no dataset declared".to_string()))?;
        if dataset.dtype != T::DATATYPE && !self.constant {
            return Err(Error::DatatypeMismatch {
                expected: dataset.dtype,
                found: T::DATATYPE,
            });
        }
        dataset.check_selection(offset, extent)?;
        Ok(dataset)
    }

    fn require_writable(&self) -> Result<()> {
        let access = self.handle.access();
        if access.is_read_only() {
            return Err(Error::ReadOnly(access));
        }
        Ok(())
    }

    /// Stage this component's operations under `name`.
    pub(crate) fn flush(&mut self, name: &str, params: &FlushParams) -> Result<()> {
        if self.handle.access().is_read_only() {
            return Ok(());
        }
        if !self.is_written() {
            if self.constant {
                self.handle.stage(
                    self.writable,
                    Parameter::CreatePath {
                        path: name.to_string(),
                    },
                );
            } else {
                let dataset = self.dataset.as_ref().ok_or_else(|| {
                    Error::InvalidDataset(format!("component '{name}' has no dataset declared"))
                })?;
                self.handle.stage(
                    self.writable,
                    Parameter::CreateDataset {
                        name: name.to_string(),
                        dtype: dataset.dtype,
                        extent: dataset.extent.clone(),
                    },
                );
            }
        } else if self.extended {
            if let Some(dataset) = &self.dataset {
                self.handle.stage(
                    self.writable,
                    Parameter::ExtendDataset {
                        extent: dataset.extent.clone(),
                    },
                );
            }
            self.extended = false;
        }
        if params.stages_payload() {
            for chunk in self.chunks.drain(..) {
                trace!(component = name, offset = ?chunk.offset, extent = ?chunk.extent, "staging chunk");
                self.handle.stage(
                    self.writable,
                    Parameter::WriteDataset {
                        offset: chunk.offset,
                        extent: chunk.extent,
                        dtype: chunk.dtype,
                        data: chunk.data,
                    },
                );
            }
        }
        self.attributes.flush(&self.handle, self.writable);
        Ok(())
    }

    /// Mark this component as constant; its value is taken from the
    /// attributes on the next [`read`](Self::read).
    pub(crate) fn mark_constant(&mut self) {
        self.constant = true;
    }

    /// Read attributes from the backend. Constant components also derive
    /// their value, element type and extent from them.
    pub(crate) fn read(&mut self) -> Result<()> {
        self.attributes
            .read(&self.handle, self.writable, ReadMode::FullyReread)?;
        if self.constant {
            let value = self
                .attributes
                .get("value")
                .cloned()
                .ok_or_else(|| Error::MissingAttribute("value".to_string()))?;
            let shape = self
                .attributes
                .get("shape")
                .ok_or_else(|| Error::MissingAttribute("shape".to_string()))?;
            let extent = shape.as_extent().ok_or_else(|| Error::AttributeType {
                name: "shape".to_string(),
                expected: "u64[]",
                found: shape.type_name(),
            })?;
            let dtype = datatype_of_attr(&value).ok_or_else(|| Error::AttributeType {
                name: "value".to_string(),
                expected: "numeric scalar",
                found: value.type_name(),
            })?;
            self.dataset = Some(Dataset { dtype, extent });
            self.value = Some(value);
        }
        Ok(())
    }
}

impl fmt::Debug for RecordComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordComponent")
            .field("writable", &self.writable)
            .field("dataset", &self.dataset)
            .field("constant", &self.value)
            .field("queued_chunks", &self.chunks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustypmd_io::{Access, IoHandler, MemoryBackend, MemoryStore};

    fn setup(access: Access) -> (IoHandle, MemoryStore) {
        let store = MemoryStore::new();
        let handle = IoHandle::new(IoHandler::new(MemoryBackend::new(store.clone()), access));
        (handle, store)
    }

    #[test]
    fn store_chunk_validates_selection() {
        let (handle, _) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        assert!(matches!(
            rc.store_chunk(&[1.0f64], &[0], &[1]),
            Err(Error::InvalidDataset(_))
        ));
        rc.reset_dataset(Dataset::of::<f64>(&[4])).unwrap();
        assert!(matches!(
            rc.store_chunk(&[1i32], &[0], &[1]),
            Err(Error::DatatypeMismatch { .. })
        ));
        assert!(matches!(
            rc.store_chunk(&[1.0f64, 2.0], &[3], &[2]),
            Err(Error::InvalidDataset(_))
        ));
        assert!(matches!(
            rc.store_chunk(&[1.0f64], &[0], &[2]),
            Err(Error::InvalidDataset(_))
        ));
        rc.store_chunk(&[1.0f64, 2.0], &[2], &[2]).unwrap();
    }

    #[test]
    fn chunks_reach_the_backend_on_flush() {
        let (handle, store) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        rc.reset_dataset(Dataset::of::<u32>(&[3])).unwrap();
        rc.store_chunk(&[7u32, 8, 9], &[0], &[3]).unwrap();
        rc.flush("counts", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();
        assert!(rc.is_written());
        assert_eq!(rc.file_position().unwrap().as_str(), "/counts");
        assert_eq!(store.dataset_info("/counts"), Some((Datatype::U32, vec![3])));
        assert_eq!(store.attribute("/counts", "unitSI"), Some(AttrValue::F64(1.0)));

        let chunk = rc.load_chunk::<u32>(&[1], &[2]).unwrap();
        assert!(!chunk.is_ready());
        handle.flush(&FlushParams::USER).unwrap();
        assert_eq!(chunk.into_vec().unwrap(), vec![8, 9]);
    }

    #[test]
    fn skeleton_flush_keeps_chunks_queued() {
        let (handle, store) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        rc.reset_dataset(Dataset::of::<f64>(&[2])).unwrap();
        rc.store_chunk(&[1.0, 2.0], &[0], &[2]).unwrap();
        rc.flush("v", &FlushParams::SKELETON).unwrap();
        assert_eq!(handle.pending(), 2); // CREATE_DATASET + WRITE_ATT
        handle.flush(&FlushParams::USER).unwrap();
        assert!(store.journal_of(rustypmd_io::Operation::WriteDataset).is_empty());

        rc.flush("v", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();
        assert_eq!(store.journal_of(rustypmd_io::Operation::WriteDataset), vec!["/v"]);
    }

    #[test]
    fn reading_a_chunk_before_flush_is_an_error() {
        let (handle, _) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        rc.reset_dataset(Dataset::of::<f64>(&[2])).unwrap();
        rc.flush("v", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();
        let chunk = rc.load_chunk::<f64>(&[0], &[2]).unwrap();
        assert!(matches!(
            chunk.into_vec(),
            Err(Error::Backend(rustypmd_io::Error::SlotEmpty(_)))
        ));
    }

    #[test]
    fn constants_answer_immediately() {
        let (handle, store) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        rc.make_constant(3.5f64, &[2, 2]).unwrap();
        let values = rc.load_chunk::<f64>(&[0, 0], &[2, 1]).unwrap();
        assert!(values.is_ready());
        assert_eq!(values.into_vec().unwrap(), vec![3.5, 3.5]);
        assert!(rc.store_chunk(&[1.0f64], &[0, 0], &[1, 1]).is_err());

        rc.flush("density", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();
        assert!(store.contains("/density"));
        assert!(!store.is_dataset("/density"));
        assert_eq!(store.attribute("/density", "value"), Some(AttrValue::F64(3.5)));
        assert_eq!(
            store.attribute("/density", "shape"),
            Some(AttrValue::U64Array(vec![2, 2]))
        );
    }

    #[test]
    fn written_dataset_keeps_type_and_rank() {
        let (handle, _) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        rc.reset_dataset(Dataset::of::<f32>(&[4])).unwrap();
        rc.flush("x", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();

        assert!(matches!(
            rc.reset_dataset(Dataset::of::<f64>(&[4])),
            Err(Error::DatatypeMismatch { .. })
        ));
        assert!(matches!(
            rc.reset_dataset(Dataset::of::<f32>(&[2, 2])),
            Err(Error::InvalidDataset(_))
        ));
        rc.reset_dataset(Dataset::of::<f32>(&[8])).unwrap();
    }

    #[test]
    fn grown_dataset_is_extended_on_flush() {
        let (handle, store) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        rc.reset_dataset(Dataset::of::<f64>(&[2])).unwrap();
        rc.store_chunk(&[1.0, 2.0], &[0], &[2]).unwrap();
        rc.flush("v", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();

        rc.reset_dataset(Dataset::of::<f64>(&[4])).unwrap();
        rc.store_chunk(&[3.0, 4.0], &[2], &[2]).unwrap();
        rc.flush("v", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();
        assert_eq!(store.journal_of(rustypmd_io::Operation::ExtendDataset), vec!["/v"]);
        assert_eq!(store.dataset_info("/v"), Some((Datatype::F64, vec![4])));

        let chunk = rc.load_chunk::<f64>(&[0], &[4]).unwrap();
        handle.flush(&FlushParams::USER).unwrap();
        assert_eq!(chunk.into_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        // unchanged extent stages nothing further
        store.clear_journal();
        rc.reset_dataset(Dataset::of::<f64>(&[4])).unwrap();
        rc.flush("v", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();
        assert!(store.journal().is_empty());
    }

    #[test]
    fn written_dataset_cannot_shrink() {
        let (handle, _) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        rc.reset_dataset(Dataset::of::<i32>(&[4, 4])).unwrap();
        rc.flush("m", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();
        assert!(matches!(
            rc.reset_dataset(Dataset::of::<i32>(&[5, 3])),
            Err(Error::InvalidDataset(_))
        ));
        assert_eq!(rc.extent(), Some(&[4, 4][..]));
    }

    #[test]
    fn overflowing_selection_is_an_error() {
        let (handle, _) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        rc.reset_dataset(Dataset::of::<f64>(&[4])).unwrap();
        assert!(matches!(
            rc.store_chunk(&[1.0f64], &[u64::MAX], &[1]),
            Err(Error::InvalidDataset(_))
        ));
        assert!(matches!(
            rc.load_chunk::<f64>(&[1], &[u64::MAX]),
            Err(Error::InvalidDataset(_))
        ));

        let mut constant = RecordComponent::new(&handle, handle.root());
        constant.make_constant(1u64, &[u64::MAX, u64::MAX]).unwrap();
        assert!(matches!(
            constant.load_chunk::<u64>(&[0, 0], &[u64::MAX, 2]),
            Err(Error::InvalidDataset(_))
        ));
    }

    #[test]
    fn redefine_accepts_new_type_and_stays_written() {
        let (handle, _) = setup(Access::Create);
        let mut rc = RecordComponent::new(&handle, handle.root());
        rc.reset_dataset(Dataset::of::<f32>(&[4])).unwrap();
        rc.flush("x", &FlushParams::USER).unwrap();
        handle.flush(&FlushParams::USER).unwrap();

        rc.redefine_dataset(Datatype::F64, vec![4, 4]).unwrap();
        assert!(rc.is_written());
        assert_eq!(rc.dtype(), Some(Datatype::F64));
        assert_eq!(rc.extent(), Some(&[4, 4][..]));
    }

    #[test]
    fn read_only_rejects_modification() {
        let (handle, _) = setup(Access::ReadOnly);
        let mut rc = RecordComponent::new(&handle, handle.root());
        assert!(matches!(
            rc.reset_dataset(Dataset::of::<f64>(&[1])),
            Err(Error::ReadOnly(Access::ReadOnly))
        ));
        assert!(matches!(
            rc.make_constant(1.0f64, &[1]),
            Err(Error::ReadOnly(_))
        ));
    }
}
