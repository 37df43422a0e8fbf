//! In-memory reference backend.
//!
//! [`MemoryStore`] holds a tree of groups and datasets with attributes.
//! Clones of a store share the same tree, so a writer and a reader can
//! be pointed at the same content:
//!
//! ```ignore
//! let store = MemoryStore::new();
//! let writer = IoHandler::new(MemoryBackend::new(store.clone()), Access::Create);
//! // ... stage and flush ...
//! let reader = IoHandler::new(MemoryBackend::new(store), Access::ReadOnly);
//! ```
//!
//! [`MemoryBackend`] drives the store in one of three modes: random
//! access, streaming read over a step schedule, or streaming write that
//! records each ended step into the store.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::debug;

use crate::backend::{Backend, Capability, ExecContext};
use crate::error::{Error, Result};
use crate::task::{AdvanceMode, AdvanceStatus, Operation, Slot};
use crate::types::{byte_len, AttrValue, Datatype, Extent};
use crate::writable::{FilePosition, WritableId};

/// Default location of the iterations group.
pub const DEFAULT_ITERATIONS_PATH: &str = "/data";

/// One executed operation, as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub operation: Operation,
    /// Location the operation acted on.
    pub path: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    children: BTreeMap<String, Node>,
    attributes: BTreeMap<String, AttrValue>,
}

#[derive(Debug, Clone)]
struct DatasetNode {
    dtype: Datatype,
    extent: Extent,
    data: Vec<u8>,
    attributes: BTreeMap<String, AttrValue>,
}

#[derive(Debug, Clone)]
enum Node {
    Group(Group),
    Dataset(DatasetNode),
}

impl Node {
    fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        match self {
            Node::Group(g) => &g.attributes,
            Node::Dataset(d) => &d.attributes,
        }
    }

    fn attributes_mut(&mut self) -> &mut BTreeMap<String, AttrValue> {
        match self {
            Node::Group(g) => &mut g.attributes,
            Node::Dataset(d) => &mut d.attributes,
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    root: Node,
    steps: Vec<Vec<u64>>,
    journal: Vec<JournalEntry>,
    fail_on: Option<Operation>,
}

impl StoreInner {
    fn node(&self, pos: &FilePosition) -> Option<&Node> {
        let mut node = &self.root;
        for seg in pos.segments() {
            match node {
                Node::Group(g) => node = g.children.get(seg)?,
                Node::Dataset(_) => return None,
            }
        }
        Some(node)
    }

    fn node_mut(&mut self, pos: &FilePosition) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for seg in pos.segments() {
            match node {
                Node::Group(g) => node = g.children.get_mut(seg)?,
                Node::Dataset(_) => return None,
            }
        }
        Some(node)
    }

    /// Create every missing group along `pos` and return the last one.
    fn ensure_group(&mut self, pos: &FilePosition) -> Result<&mut Group> {
        let mut group = match &mut self.root {
            Node::Group(g) => g,
            Node::Dataset(_) => return Err(Error::DataError("root is a dataset".into())),
        };
        for seg in pos.segments() {
            let child = group
                .children
                .entry(seg.to_string())
                .or_insert_with(|| Node::Group(Group::default()));
            group = match child {
                Node::Group(g) => g,
                Node::Dataset(_) => {
                    return Err(Error::DataError(format!(
                        "{pos}: segment '{seg}' is a dataset"
                    )))
                }
            };
        }
        Ok(group)
    }
}

/// Shared in-memory tree of groups and datasets.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Rc<RefCell<StoreInner>>,
}

impl MemoryStore {
    /// Create an empty store holding only the root group.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                root: Node::Group(Group::default()),
                steps: Vec::new(),
                journal: Vec::new(),
                fail_on: None,
            })),
        }
    }

    /// Every operation executed against this store, in execution order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.borrow().journal.clone()
    }

    /// Operation tags of the journal, in execution order.
    pub fn operations(&self) -> Vec<Operation> {
        self.inner
            .borrow()
            .journal
            .iter()
            .map(|e| e.operation)
            .collect()
    }

    /// Journal entries for one operation.
    pub fn journal_of(&self, operation: Operation) -> Vec<String> {
        self.inner
            .borrow()
            .journal
            .iter()
            .filter(|e| e.operation == operation)
            .map(|e| e.path.clone())
            .collect()
    }

    pub fn clear_journal(&self) {
        self.inner.borrow_mut().journal.clear();
    }

    /// Step schedule recorded by streaming writers.
    pub fn steps(&self) -> Vec<Vec<u64>> {
        self.inner.borrow().steps.clone()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.borrow().node(&FilePosition::new(path)).is_some()
    }

    pub fn is_dataset(&self, path: &str) -> bool {
        matches!(
            self.inner.borrow().node(&FilePosition::new(path)),
            Some(Node::Dataset(_))
        )
    }

    /// Element type and extent of the dataset at `path`.
    pub fn dataset_info(&self, path: &str) -> Option<(Datatype, Extent)> {
        match self.inner.borrow().node(&FilePosition::new(path)) {
            Some(Node::Dataset(d)) => Some((d.dtype, d.extent.clone())),
            _ => None,
        }
    }

    pub fn attribute(&self, path: &str, name: &str) -> Option<AttrValue> {
        self.inner
            .borrow()
            .node(&FilePosition::new(path))
            .and_then(|n| n.attributes().get(name).cloned())
    }

    /// Remove the object at `path`. Returns false if it did not exist.
    pub fn remove(&self, path: &str) -> bool {
        let pos = FilePosition::new(path);
        let segments: Vec<&str> = pos.segments().collect();
        let Some((last, parents)) = segments.split_last() else {
            return false;
        };
        let parent = FilePosition::new(format!("/{}", parents.join("/")));
        let mut inner = self.inner.borrow_mut();
        match inner.node_mut(&parent) {
            Some(Node::Group(g)) => g.children.remove(*last).is_some(),
            _ => false,
        }
    }

    /// Make the next execution of `operation` fail with a backend error.
    pub fn fail_on(&self, operation: Operation) {
        self.inner.borrow_mut().fail_on = Some(operation);
    }

    fn check_failure(&self, operation: Operation, pos: &FilePosition) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_on == Some(operation) {
            inner.fail_on = None;
            return Err(Error::NotFound(format!("{pos} (injected {operation} failure)")));
        }
        Ok(())
    }

    fn record(&self, operation: Operation, pos: &FilePosition) {
        self.inner.borrow_mut().journal.push(JournalEntry {
            operation,
            path: pos.as_str().to_string(),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum StepMode {
    RandomAccess,
    StreamRead {
        schedule: Vec<Vec<u64>>,
        current: Option<usize>,
    },
    StreamWrite {
        recorded: BTreeSet<u64>,
    },
}

/// Backend executing tasks against a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryBackend {
    store: MemoryStore,
    mode: StepMode,
    iterations_path: FilePosition,
}

impl MemoryBackend {
    /// Random-access backend: everything in the store is visible at once.
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            mode: StepMode::RandomAccess,
            iterations_path: FilePosition::new(DEFAULT_ITERATIONS_PATH),
        }
    }

    /// Streaming reader exposing the iterations of `schedule[k]` in step `k`.
    pub fn streaming_reader(store: MemoryStore, schedule: Vec<Vec<u64>>) -> Self {
        Self {
            store,
            mode: StepMode::StreamRead {
                schedule,
                current: None,
            },
            iterations_path: FilePosition::new(DEFAULT_ITERATIONS_PATH),
        }
    }

    /// Streaming reader replaying the steps a streaming writer recorded.
    pub fn replay(store: MemoryStore) -> Self {
        let schedule = store.steps();
        Self::streaming_reader(store, schedule)
    }

    /// Streaming writer: every ended step records the iterations created
    /// since the previous one.
    pub fn streaming_writer(store: MemoryStore) -> Self {
        Self {
            store,
            mode: StepMode::StreamWrite {
                recorded: BTreeSet::new(),
            },
            iterations_path: FilePosition::new(DEFAULT_ITERATIONS_PATH),
        }
    }

    /// Location of the iterations group, `/data` by default.
    pub fn with_iterations_path(mut self, path: &str) -> Self {
        self.iterations_path = FilePosition::root().join(path);
        self
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Iteration index `pos` belongs to, if it lies below the iterations group.
    fn iteration_of(&self, pos: &FilePosition) -> Option<u64> {
        let base: Vec<&str> = self.iterations_path.segments().collect();
        let segs: Vec<&str> = pos.segments().collect();
        if segs.len() <= base.len() || segs[..base.len()] != base[..] {
            return None;
        }
        segs[base.len()].parse().ok()
    }

    /// Whether `pos` is part of the currently visible step.
    fn visible(&self, pos: &FilePosition) -> bool {
        match &self.mode {
            StepMode::StreamRead { schedule, current } => match self.iteration_of(pos) {
                Some(index) => current
                    .and_then(|c| schedule.get(c))
                    .is_some_and(|step| step.contains(&index)),
                None => true,
            },
            _ => true,
        }
    }

    fn lookup<T>(&self, pos: &FilePosition, f: impl FnOnce(&Node) -> Result<T>) -> Result<T> {
        if !self.visible(pos) {
            return Err(Error::NotFound(format!("{pos} (not in current step)")));
        }
        let inner = self.store.inner.borrow();
        let node = inner
            .node(pos)
            .ok_or_else(|| Error::NotFound(pos.to_string()))?;
        f(node)
    }

    fn children(&self, pos: &FilePosition, datasets: bool) -> Result<Vec<String>> {
        let names = self.lookup(pos, |node| match node {
            Node::Group(g) => Ok(g
                .children
                .iter()
                .filter(|(_, c)| matches!(c, Node::Dataset(_)) == datasets)
                .map(|(k, _)| k.clone())
                .collect::<Vec<_>>()),
            Node::Dataset(_) => Err(Error::DataError(format!("{pos} is not a group"))),
        })?;
        Ok(names
            .into_iter()
            .filter(|name| self.visible(&pos.join(name)))
            .collect())
    }

    /// Iteration indices currently present under the iterations group.
    fn present_iterations(&self) -> BTreeSet<u64> {
        let inner = self.store.inner.borrow();
        match inner.node(&self.iterations_path) {
            Some(Node::Group(g)) => g.children.keys().filter_map(|k| k.parse().ok()).collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// Visit every innermost row of the chunk `offset/extent` inside a dataset
/// of `dims`, passing (element index in chunk, element index in dataset,
/// row length in elements).
fn for_each_row(dims: &[u64], offset: &[u64], extent: &[u64], mut f: impl FnMut(usize, usize, usize)) {
    if dims.is_empty() {
        f(0, 0, 1);
        return;
    }
    let rank = dims.len();
    let row = extent[rank - 1] as usize;
    if extent.contains(&0) {
        return;
    }
    let mut strides = vec![1u64; rank];
    for d in (0..rank - 1).rev() {
        strides[d] = strides[d + 1] * dims[d + 1];
    }
    let outer: u64 = extent[..rank - 1].iter().product();
    let mut idx = vec![0u64; rank - 1];
    for r in 0..outer as usize {
        let mut linear = offset[rank - 1];
        for d in 0..rank - 1 {
            linear += (offset[d] + idx[d]) * strides[d];
        }
        f(r * row, linear as usize, row);
        for d in (0..rank - 1).rev() {
            idx[d] += 1;
            if idx[d] < extent[d] {
                break;
            }
            idx[d] = 0;
        }
    }
}

fn check_selection(pos: &FilePosition, dims: &[u64], offset: &[u64], extent: &[u64]) -> Result<()> {
    if offset.len() != dims.len() || extent.len() != dims.len() {
        return Err(Error::DataError(format!(
            "{pos}: selection rank {} does not match dataset rank {}",
            extent.len(),
            dims.len()
        )));
    }
    for d in 0..dims.len() {
        if offset[d].checked_add(extent[d]).map_or(true, |end| end > dims[d]) {
            return Err(Error::DataError(format!(
                "{pos}: selection {offset:?}+{extent:?} exceeds extent {dims:?}"
            )));
        }
    }
    Ok(())
}

fn checked_byte_len(pos: &FilePosition, extent: &[u64], dtype: Datatype) -> Result<usize> {
    byte_len(extent, dtype)
        .ok_or_else(|| Error::DataError(format!("{pos}: extent {extent:?} is too large")))
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> Vec<Capability> {
        let mut caps = vec![
            Capability::ReadData,
            Capability::WriteData,
            Capability::Attributes,
        ];
        match self.mode {
            StepMode::RandomAccess => caps.push(Capability::RandomAccess),
            StepMode::StreamRead { .. } | StepMode::StreamWrite { .. } => {
                caps.push(Capability::Streaming)
            }
        }
        caps
    }

    fn create_path(&mut self, ctx: &mut ExecContext<'_>, target: WritableId, path: &str) -> Result<()> {
        let pos = ctx.child_position(target, path)?;
        self.store.check_failure(Operation::CreatePath, &pos)?;
        self.store.inner.borrow_mut().ensure_group(&pos)?;
        self.store.record(Operation::CreatePath, &pos);
        ctx.writables_mut().mark_written(target, pos);
        Ok(())
    }

    fn open_path(&mut self, ctx: &mut ExecContext<'_>, target: WritableId, path: &str) -> Result<()> {
        let pos = ctx.child_position(target, path)?;
        self.store.check_failure(Operation::OpenPath, &pos)?;
        self.lookup(&pos, |node| match node {
            Node::Group(_) => Ok(()),
            Node::Dataset(_) => Err(Error::DataError(format!("{pos} is a dataset, not a path"))),
        })?;
        self.store.record(Operation::OpenPath, &pos);
        ctx.writables_mut().mark_written(target, pos);
        Ok(())
    }

    fn list_paths(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        paths: &Slot<Vec<String>>,
    ) -> Result<()> {
        let pos = ctx.position(target)?;
        self.store.check_failure(Operation::ListPaths, &pos)?;
        let names = self.children(&pos, false)?;
        self.store.record(Operation::ListPaths, &pos);
        paths.fill(names);
        Ok(())
    }

    fn create_dataset(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        name: &str,
        dtype: Datatype,
        extent: &[u64],
    ) -> Result<()> {
        let pos = ctx.child_position(target, name)?;
        self.store.check_failure(Operation::CreateDataset, &pos)?;
        let parent = ctx
            .writables()
            .resolve_parent_position(target)
            .cloned()
            .ok_or(Error::UnresolvedPosition(target))?;
        let size = checked_byte_len(&pos, extent, dtype)?;
        {
            let mut inner = self.store.inner.borrow_mut();
            let group = inner.ensure_group(&parent)?;
            let fresh = || {
                Node::Dataset(DatasetNode {
                    dtype,
                    extent: extent.to_vec(),
                    data: vec![0; size],
                    attributes: BTreeMap::new(),
                })
            };
            let key = name.trim_matches('/').to_string();
            match group.children.get(&key) {
                Some(Node::Dataset(d)) if d.dtype == dtype && d.extent == extent => {}
                Some(Node::Group(_)) => {
                    return Err(Error::DataError(format!("{pos} already exists as a path")))
                }
                _ => {
                    group.children.insert(key, fresh());
                }
            }
        }
        self.store.record(Operation::CreateDataset, &pos);
        ctx.writables_mut().mark_written(target, pos);
        Ok(())
    }

    fn extend_dataset(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        extent: &[u64],
    ) -> Result<()> {
        let pos = ctx.position(target)?;
        self.store.check_failure(Operation::ExtendDataset, &pos)?;
        {
            let mut inner = self.store.inner.borrow_mut();
            let dataset = match inner.node_mut(&pos) {
                Some(Node::Dataset(d)) => d,
                _ => return Err(Error::NotFound(format!("{pos} is not a dataset"))),
            };
            let grows = extent.len() == dataset.extent.len()
                && extent.iter().zip(&dataset.extent).all(|(new, old)| new >= old);
            if !grows {
                return Err(Error::DataError(format!(
                    "{pos}: cannot resize {:?} to {extent:?}",
                    dataset.extent
                )));
            }
            let size = dataset.dtype.size();
            let mut data = vec![0u8; checked_byte_len(&pos, extent, dataset.dtype)?];
            let origin = vec![0u64; extent.len()];
            for_each_row(extent, &origin, &dataset.extent, |src, dst, len| {
                data[dst * size..(dst + len) * size]
                    .copy_from_slice(&dataset.data[src * size..(src + len) * size]);
            });
            debug!(%pos, from = ?dataset.extent, to = ?extent, "memory backend extends dataset");
            dataset.extent = extent.to_vec();
            dataset.data = data;
        }
        self.store.record(Operation::ExtendDataset, &pos);
        Ok(())
    }

    fn list_datasets(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        datasets: &Slot<Vec<String>>,
    ) -> Result<()> {
        let pos = ctx.position(target)?;
        self.store.check_failure(Operation::ListDatasets, &pos)?;
        let names = self.children(&pos, true)?;
        self.store.record(Operation::ListDatasets, &pos);
        datasets.fill(names);
        Ok(())
    }

    fn open_dataset(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        name: &str,
        dtype: &Slot<Datatype>,
        extent: &Slot<Extent>,
    ) -> Result<()> {
        let pos = ctx.child_position(target, name)?;
        self.store.check_failure(Operation::OpenDataset, &pos)?;
        let (dt, ext) = self.lookup(&pos, |node| match node {
            Node::Dataset(d) => Ok((d.dtype, d.extent.clone())),
            Node::Group(_) => Err(Error::DataError(format!("{pos} is a path, not a dataset"))),
        })?;
        self.store.record(Operation::OpenDataset, &pos);
        dtype.fill(dt);
        extent.fill(ext);
        ctx.writables_mut().mark_written(target, pos);
        Ok(())
    }

    fn write_dataset(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        offset: &[u64],
        extent: &[u64],
        dtype: Datatype,
        data: &[u8],
    ) -> Result<()> {
        let pos = ctx.position(target)?;
        self.store.check_failure(Operation::WriteDataset, &pos)?;
        {
            let mut inner = self.store.inner.borrow_mut();
            let dataset = match inner.node_mut(&pos) {
                Some(Node::Dataset(d)) => d,
                _ => return Err(Error::NotFound(format!("{pos} is not a dataset"))),
            };
            if dataset.dtype != dtype {
                return Err(Error::DataError(format!(
                    "{pos}: writing {dtype} into {} dataset",
                    dataset.dtype
                )));
            }
            check_selection(&pos, &dataset.extent, offset, extent)?;
            let size = dtype.size();
            let expected = checked_byte_len(&pos, extent, dtype)?;
            if data.len() != expected {
                return Err(Error::DataError(format!(
                    "{pos}: chunk holds {} bytes, selection needs {expected}",
                    data.len()
                )));
            }
            let dims = dataset.extent.clone();
            for_each_row(&dims, offset, extent, |src, dst, len| {
                dataset.data[dst * size..(dst + len) * size]
                    .copy_from_slice(&data[src * size..(src + len) * size]);
            });
        }
        self.store.record(Operation::WriteDataset, &pos);
        Ok(())
    }

    fn read_dataset(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        offset: &[u64],
        extent: &[u64],
        dtype: Datatype,
        data: &Slot<Vec<u8>>,
    ) -> Result<()> {
        let pos = ctx.position(target)?;
        self.store.check_failure(Operation::ReadDataset, &pos)?;
        let out = self.lookup(&pos, |node| {
            let Node::Dataset(dataset) = node else {
                return Err(Error::NotFound(format!("{pos} is not a dataset")));
            };
            if dataset.dtype != dtype {
                return Err(Error::DataError(format!(
                    "{pos}: reading {dtype} from {} dataset",
                    dataset.dtype
                )));
            }
            check_selection(&pos, &dataset.extent, offset, extent)?;
            let size = dtype.size();
            let mut out = vec![0u8; checked_byte_len(&pos, extent, dtype)?];
            for_each_row(&dataset.extent, offset, extent, |dst, src, len| {
                out[dst * size..(dst + len) * size]
                    .copy_from_slice(&dataset.data[src * size..(src + len) * size]);
            });
            Ok(out)
        })?;
        self.store.record(Operation::ReadDataset, &pos);
        data.fill(out);
        Ok(())
    }

    fn write_attribute(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        name: &str,
        value: &AttrValue,
    ) -> Result<()> {
        let pos = ctx.position(target)?;
        self.store.check_failure(Operation::WriteAttribute, &pos)?;
        {
            let mut inner = self.store.inner.borrow_mut();
            let node = inner
                .node_mut(&pos)
                .ok_or_else(|| Error::NotFound(pos.to_string()))?;
            node.attributes_mut().insert(name.to_string(), value.clone());
        }
        self.store.record(Operation::WriteAttribute, &pos);
        Ok(())
    }

    fn read_attribute(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        name: &str,
        value: &Slot<AttrValue>,
    ) -> Result<()> {
        let pos = ctx.position(target)?;
        self.store.check_failure(Operation::ReadAttribute, &pos)?;
        let attr = self.lookup(&pos, |node| {
            node.attributes()
                .get(name)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("{pos}: attribute '{name}'")))
        })?;
        self.store.record(Operation::ReadAttribute, &pos);
        value.fill(attr);
        Ok(())
    }

    fn list_attributes(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        names: &Slot<Vec<String>>,
    ) -> Result<()> {
        let pos = ctx.position(target)?;
        self.store.check_failure(Operation::ListAttributes, &pos)?;
        let list = self.lookup(&pos, |node| Ok(node.attributes().keys().cloned().collect()))?;
        self.store.record(Operation::ListAttributes, &pos);
        names.fill(list);
        Ok(())
    }

    fn keep_synchronous(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        other: WritableId,
    ) -> Result<()> {
        ctx.writables_mut().synchronize(target, other);
        let pos = ctx.position(target)?;
        self.store.record(Operation::KeepSynchronous, &pos);
        Ok(())
    }

    fn advance(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        mode: AdvanceMode,
        status: &Slot<AdvanceStatus>,
        iterations: &Slot<Vec<u64>>,
    ) -> Result<()> {
        let pos = ctx.position(target)?;
        self.store.check_failure(Operation::Advance, &pos)?;
        let present = match self.mode {
            StepMode::StreamWrite { .. } if mode == AdvanceMode::EndStep => self.present_iterations(),
            _ => BTreeSet::new(),
        };
        match (&mut self.mode, mode) {
            (StepMode::RandomAccess, _) => status.fill(AdvanceStatus::RandomAccess),
            (StepMode::StreamRead { schedule, current }, AdvanceMode::BeginStep) => {
                let next = current.map_or(0, |c| c + 1);
                *current = Some(next);
                match schedule.get(next) {
                    Some(step) => {
                        debug!(step = next, iterations = ?step, "memory backend begins step");
                        iterations.fill(step.clone());
                        status.fill(AdvanceStatus::Ok);
                    }
                    None => status.fill(AdvanceStatus::Over),
                }
            }
            (StepMode::StreamRead { .. }, AdvanceMode::EndStep) => status.fill(AdvanceStatus::Ok),
            (StepMode::StreamWrite { .. }, AdvanceMode::BeginStep) => status.fill(AdvanceStatus::Ok),
            (StepMode::StreamWrite { recorded }, AdvanceMode::EndStep) => {
                let fresh: Vec<u64> = present.difference(recorded).copied().collect();
                recorded.extend(fresh.iter().copied());
                debug!(iterations = ?fresh, "memory backend records step");
                self.store.inner.borrow_mut().steps.push(fresh);
                status.fill(AdvanceStatus::Ok);
            }
        }
        self.store.record(Operation::Advance, &pos);
        Ok(())
    }
}
