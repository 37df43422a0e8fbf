//! The series: root of the object model and owner of the IO handler.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rustypmd_io::{
    Access, AdvanceMode, AdvanceStatus, Backend, Capability, FlushParams, IoHandler, Parameter,
    Slot, WritableId,
};
use tracing::{debug, warn};

use crate::attributes::{Attributes, ReadMode};
use crate::config::SeriesOptions;
use crate::error::{Error, Result};
use crate::handle::IoHandle;
use crate::iteration::{CloseStatus, Iteration};
use crate::read_iterations::ReadIterations;

/// Format version written to new series.
pub const OPENPMD_VERSION: &str = "1.1.0";

static NEXT_SERIES_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Series`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(u64);

impl SeriesId {
    fn next() -> Self {
        SeriesId(NEXT_SERIES_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Kind of stream irregularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    /// A step was advertised with no iterations in it.
    EmptyStep,
}

/// A stream irregularity that ended iteration early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamAnomaly {
    /// Number of the step (1-based) the anomaly was seen in.
    pub step: u64,
    pub kind: AnomalyKind,
}

impl fmt::Display for StreamAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AnomalyKind::EmptyStep => write!(f, "step {} contains no iterations", self.step),
        }
    }
}

/// Outcome of beginning a backend step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StepStatus {
    /// No further steps.
    Over,
    /// The backend has no steps; every known iteration is visible.
    RandomAccess,
    /// A step began holding these iterations.
    Iterations(Vec<u64>),
}

/// A time series of iterations backed by one [`Backend`].
///
/// ```
/// use rustypmd::{Access, Dataset, MemoryBackend, MemoryStore, Series, SeriesOptions};
///
/// let store = MemoryStore::new();
/// let mut series = Series::new(
///     MemoryBackend::new(store.clone()),
///     SeriesOptions::new(Access::Create),
/// )?;
/// let rho = series
///     .iteration_mut(0)?
///     .meshes_mut()
///     .record_mut("rho")?
///     .scalar_mut()?;
/// rho.reset_dataset(Dataset::of::<f64>(&[2]))?;
/// rho.store_chunk(&[1.0, 2.0], &[0], &[2])?;
/// series.close()?;
/// assert!(store.is_dataset("/data/0/meshes/rho"));
/// # Ok::<(), rustypmd::Error>(())
/// ```
pub struct Series {
    id: SeriesId,
    handle: IoHandle,
    options: SeriesOptions,
    attributes: Attributes,
    iterations_writable: WritableId,
    iterations: BTreeMap<u64, Iteration>,
    steps_begun: u64,
    step_active: bool,
    anomalies: Vec<StreamAnomaly>,
}

impl Series {
    /// Open or create a series on `backend`.
    ///
    /// Read modes read the root attributes and, on random-access backends,
    /// discover every iteration. Streaming backends discover iterations
    /// step by step through [`Series::read_iterations`].
    pub fn new<B: Backend + 'static>(backend: B, options: SeriesOptions) -> Result<Self> {
        options.validate()?;
        let handle = IoHandle::new(IoHandler::new(backend, options.access));
        let iterations_writable = handle.new_writable(Some(handle.root()));
        let mut series = Self {
            id: SeriesId::next(),
            handle,
            options,
            attributes: Attributes::new(),
            iterations_writable,
            iterations: BTreeMap::new(),
            steps_begun: 0,
            step_active: false,
            anomalies: Vec::new(),
        };
        match series.options.access {
            Access::Create | Access::Append => series.init_attributes(),
            Access::ReadOnly | Access::ReadWrite => series.read_root()?,
        }
        debug!(
            id = series.id.0,
            access = %series.options.access,
            iterations = series.iterations.len(),
            "opened series"
        );
        Ok(series)
    }

    fn init_attributes(&mut self) {
        let a = &mut self.attributes;
        a.set("openPMD", OPENPMD_VERSION);
        a.set("openPMDextension", 0u64);
        a.set("basePath", self.options.base_path.as_str());
        a.set("meshesPath", self.options.meshes_path.as_str());
        a.set("particlesPath", self.options.particles_path.as_str());
        a.set("iterationEncoding", "groupBased");
        a.set("iterationFormat", self.options.base_path.as_str());
    }

    fn read_root(&mut self) -> Result<()> {
        let root = self.handle.root();
        self.attributes
            .read(&self.handle, root, ReadMode::FullyReread)?;
        self.attributes.get_str("openPMD")?;
        if let Some(encoding) = self.attributes.get("iterationEncoding") {
            if encoding.as_str() != Some("groupBased") {
                let found = encoding
                    .as_str()
                    .map_or_else(|| encoding.type_name().to_string(), str::to_string);
                return Err(Error::UnsupportedEncoding(found));
            }
        }
        if self.handle.supports(Capability::RandomAccess) {
            self.discover_iterations()?;
        }
        Ok(())
    }

    pub fn id(&self) -> SeriesId {
        self.id
    }

    pub fn access(&self) -> Access {
        self.options.access
    }

    pub fn options(&self) -> &SeriesOptions {
        &self.options
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Stream anomalies seen so far, oldest first.
    pub fn diagnostics(&self) -> &[StreamAnomaly] {
        &self.anomalies
    }

    /// Number of staged, not yet executed backend tasks.
    pub fn pending_tasks(&self) -> usize {
        self.handle.pending()
    }

    /// Known iteration indices in ascending order.
    pub fn iteration_indices(&self) -> Vec<u64> {
        self.iterations.keys().copied().collect()
    }

    pub fn contains_iteration(&self, index: u64) -> bool {
        self.iterations.contains_key(&index)
    }

    /// The iteration at `index` as held in memory, without reading it.
    pub fn iteration(&self, index: u64) -> Option<&Iteration> {
        self.iterations.get(&index)
    }

    pub(crate) fn is_closed(&self, index: u64) -> bool {
        self.iterations
            .get(&index)
            .is_some_and(Iteration::is_closed)
    }

    /// True if the backend exposes content in steps.
    pub(crate) fn supports_steps(&self) -> bool {
        self.handle.supports(Capability::Streaming)
    }

    /// Indices of iterations that are not closed.
    pub(crate) fn open_indices(&self) -> Vec<u64> {
        self.iterations
            .iter()
            .filter(|(_, it)| !it.is_closed())
            .map(|(k, _)| *k)
            .collect()
    }

    /// Iteration `index`, created if absent and the series is writable.
    ///
    /// Closed iterations cannot be reopened.
    pub fn iteration_mut(&mut self, index: u64) -> Result<&mut Iteration> {
        if !self.iterations.contains_key(&index) {
            let access = self.options.access;
            if access.is_read_only() {
                return Err(Error::IterationNotFound(index));
            }
            let iteration = Iteration::new(&self.handle, self.iterations_writable, CloseStatus::Open);
            self.iterations.insert(index, iteration);
        }
        self.open_iteration(index)
    }

    /// Open an existing iteration, reading it first if its parsing was deferred.
    pub fn open_iteration(&mut self, index: u64) -> Result<&mut Iteration> {
        let iteration = self
            .iterations
            .get_mut(&index)
            .ok_or(Error::IterationNotFound(index))?;
        match iteration.close_status() {
            CloseStatus::Closed => return Err(Error::IterationClosed(index)),
            CloseStatus::ParseDeferred => iteration.read(index, &self.options)?,
            CloseStatus::Open => {}
        }
        Ok(iteration)
    }

    /// Flush iteration `index` and close it. Closing is one-way.
    ///
    /// Writing to a streaming backend ends the current step, so every
    /// closed iteration forms one step.
    pub fn close_iteration(&mut self, index: u64) -> Result<()> {
        let status = self
            .iterations
            .get(&index)
            .map(Iteration::close_status)
            .ok_or(Error::IterationNotFound(index))?;
        if status == CloseStatus::Closed {
            return Ok(());
        }
        let writable = self.options.access.is_writable();
        if writable && status == CloseStatus::Open {
            self.stage_iterations_group();
            if let Some(iteration) = self.iterations.get_mut(&index) {
                iteration.flush(index, &self.options, &FlushParams::USER)?;
            }
            let root = self.handle.root();
            self.attributes.flush(&self.handle, root);
        }
        // A step begun by the reader is ended by `next_step`.
        if writable && self.handle.supports(Capability::Streaming) && !self.step_active {
            self.stage_advance(AdvanceMode::EndStep);
        }
        self.handle.flush(&FlushParams::USER)?;
        if let Some(iteration) = self.iterations.get_mut(&index) {
            iteration.set_status(CloseStatus::Closed);
        }
        debug!(index, "closed iteration");
        Ok(())
    }

    /// Flush every open iteration and execute the queue.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_with(&FlushParams::USER)
    }

    /// Flush with explicit parameters. A skeleton-only flush stages
    /// structure but does not execute the queue.
    pub fn flush_with(&mut self, params: &FlushParams) -> Result<()> {
        let writable = self.options.access.is_writable();
        if writable {
            self.stage_iterations_group();
        }
        for (index, iteration) in &mut self.iterations {
            if iteration.close_status() == CloseStatus::Open {
                iteration.flush(*index, &self.options, params)?;
            }
        }
        if writable {
            let root = self.handle.root();
            self.attributes.flush(&self.handle, root);
        }
        if params.stages_payload() {
            self.handle.flush(params)?;
        }
        Ok(())
    }

    /// Flush and release the backend. A streaming writer first closes
    /// every open iteration so that each ends up in a step.
    pub fn close(mut self) -> Result<()> {
        if self.options.access.is_writable() && self.handle.supports(Capability::Streaming) {
            for index in self.open_indices() {
                self.close_iteration(index)?;
            }
        }
        self.flush()?;
        self.handle.close()
    }

    /// Iterate the series step by step.
    pub fn read_iterations(&mut self) -> ReadIterations<'_> {
        ReadIterations::new(self)
    }

    fn stage_iterations_group(&mut self) {
        if !self.handle.written(self.iterations_writable) {
            self.handle.stage(
                self.iterations_writable,
                Parameter::CreatePath {
                    path: self.options.iterations_group().to_string(),
                },
            );
        }
    }

    fn stage_advance(&mut self, mode: AdvanceMode) -> (Slot<AdvanceStatus>, Slot<Vec<u64>>) {
        let status = Slot::new();
        let iterations = Slot::new();
        self.handle.stage(
            self.handle.root(),
            Parameter::Advance {
                mode,
                status: status.clone(),
                iterations: iterations.clone(),
            },
        );
        (status, iterations)
    }

    /// List the iterations group and register indices not yet known.
    /// Returns the newly registered indices.
    fn discover_iterations(&mut self) -> Result<Vec<u64>> {
        if !self.handle.written(self.iterations_writable) {
            self.handle.stage(
                self.iterations_writable,
                Parameter::OpenPath {
                    path: self.options.iterations_group().to_string(),
                },
            );
        }
        let paths = Slot::new();
        self.handle.stage(
            self.iterations_writable,
            Parameter::ListPaths { paths: paths.clone() },
        );
        self.handle.flush(&FlushParams::INTERNAL)?;

        let mut fresh = Vec::new();
        for name in paths.take_required("iteration paths")? {
            match name.parse::<u64>() {
                Ok(index) => {
                    if self.register(index)? {
                        fresh.push(index);
                    }
                }
                Err(_) => warn!(name = %name, "skipping non-numeric iteration name"),
            }
        }
        fresh.sort_unstable();
        Ok(fresh)
    }

    /// Register a discovered iteration. Returns false if it was known.
    fn register(&mut self, index: u64) -> Result<bool> {
        if self.iterations.contains_key(&index) {
            return Ok(false);
        }
        let mut iteration = Iteration::new(
            &self.handle,
            self.iterations_writable,
            CloseStatus::ParseDeferred,
        );
        if !self.options.defer_iteration_parsing {
            iteration.read(index, &self.options)?;
        }
        self.iterations.insert(index, iteration);
        Ok(true)
    }

    /// Ask the backend for its next step.
    pub(crate) fn begin_step(&mut self) -> Result<StepStatus> {
        let (status, reported) = self.stage_advance(AdvanceMode::BeginStep);
        self.handle.flush(&FlushParams::INTERNAL)?;
        match status.take_required("advance status")? {
            AdvanceStatus::Over => {
                self.step_active = false;
                Ok(StepStatus::Over)
            }
            AdvanceStatus::RandomAccess => Ok(StepStatus::RandomAccess),
            AdvanceStatus::Ok => {
                self.steps_begun += 1;
                self.step_active = true;
                let discovered = self.discover_iterations()?;
                let in_step = match reported.take() {
                    Some(indices) => {
                        for &index in &indices {
                            self.register(index)?;
                        }
                        indices
                    }
                    None => discovered,
                };
                debug!(step = self.steps_begun, iterations = ?in_step, "began step");
                Ok(StepStatus::Iterations(in_step))
            }
        }
    }

    /// End the active step, if any, and begin the next one.
    pub(crate) fn next_step(&mut self) -> Result<StepStatus> {
        if self.step_active {
            let (status, _) = self.stage_advance(AdvanceMode::EndStep);
            self.handle.flush(&FlushParams::INTERNAL)?;
            self.step_active = false;
            if status.take() == Some(AdvanceStatus::Over) {
                return Ok(StepStatus::Over);
            }
        }
        self.begin_step()
    }

    /// Record an empty step. Iteration ends; the anomaly stays queryable.
    pub(crate) fn report_empty_step(&mut self) {
        let anomaly = StreamAnomaly {
            step: self.steps_begun,
            kind: AnomalyKind::EmptyStep,
        };
        warn!(series = self.id.0, %anomaly, "stream anomaly, ending iteration");
        self.anomalies.push(anomaly);
    }
}

impl fmt::Debug for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Series")
            .field("id", &self.id)
            .field("access", &self.options.access)
            .field("iterations", &self.iterations.keys().collect::<Vec<_>>())
            .field("anomalies", &self.anomalies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustypmd_io::{AttrValue, MemoryBackend, MemoryStore, Operation};

    fn create(store: &MemoryStore) -> Series {
        Series::new(
            MemoryBackend::new(store.clone()),
            SeriesOptions::new(Access::Create),
        )
        .unwrap()
    }

    #[test]
    fn new_series_writes_root_attributes() {
        let store = MemoryStore::new();
        let mut series = create(&store);
        series.flush().unwrap();
        assert_eq!(store.attribute("/", "openPMD"), Some(AttrValue::from("1.1.0")));
        assert_eq!(
            store.attribute("/", "iterationEncoding"),
            Some(AttrValue::from("groupBased"))
        );
        assert_eq!(store.attribute("/", "basePath"), Some(AttrValue::from("/data/%T/")));
        assert!(store.contains("/data"));
    }

    #[test]
    fn ids_are_unique() {
        let store = MemoryStore::new();
        assert_ne!(create(&store).id(), create(&store).id());
    }

    #[test]
    fn closed_iteration_cannot_be_reopened() {
        let store = MemoryStore::new();
        let mut series = create(&store);
        series.iteration_mut(3).unwrap().set_time(1.5);
        series.close_iteration(3).unwrap();
        assert_eq!(store.attribute("/data/3", "time"), Some(AttrValue::F64(1.5)));

        store.clear_journal();
        assert!(matches!(series.iteration_mut(3), Err(Error::IterationClosed(3))));
        assert!(matches!(series.open_iteration(3), Err(Error::IterationClosed(3))));
        series.flush().unwrap();
        assert!(store.journal_of(Operation::CreatePath).is_empty());
    }

    #[test]
    fn read_only_cannot_create_iterations() {
        let store = MemoryStore::new();
        create(&store).close().unwrap();
        let mut series = Series::new(
            MemoryBackend::new(store),
            SeriesOptions::new(Access::ReadOnly),
        )
        .unwrap();
        assert!(matches!(
            series.iteration_mut(0),
            Err(Error::IterationNotFound(0))
        ));
    }

    #[test]
    fn missing_root_attributes_are_reported() {
        let store = MemoryStore::new();
        let err = Series::new(
            MemoryBackend::new(store),
            SeriesOptions::new(Access::ReadOnly),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingAttribute(name) if name == "openPMD"));
    }

    #[test]
    fn skeleton_flush_executes_nothing() {
        let store = MemoryStore::new();
        let mut series = create(&store);
        series.iteration_mut(0).unwrap();
        series.flush_with(&FlushParams::SKELETON).unwrap();
        assert!(store.journal().is_empty());
        assert!(series.pending_tasks() > 0);
        series.flush().unwrap();
        assert!(store.contains("/data/0"));
        assert_eq!(series.pending_tasks(), 0);
    }

    #[test]
    fn non_numeric_iteration_names_are_skipped() {
        let store = MemoryStore::new();
        let mut series = create(&store);
        series.iteration_mut(1).unwrap();
        series.close().unwrap();

        // A stray group below the iterations path.
        let mut h = IoHandler::new(MemoryBackend::new(store.clone()), Access::Create);
        let root = h.root();
        let data = h.writables_mut().insert(Some(root));
        h.enqueue(rustypmd_io::IoTask::new(data, Parameter::OpenPath { path: "data".into() }));
        let stray = h.writables_mut().insert(Some(data));
        h.enqueue(rustypmd_io::IoTask::new(stray, Parameter::CreatePath { path: "notes".into() }));
        h.flush(&FlushParams::USER).unwrap();

        let series = Series::new(
            MemoryBackend::new(store),
            SeriesOptions::new(Access::ReadOnly),
        )
        .unwrap();
        assert_eq!(series.iteration_indices(), vec![1]);
    }

    #[test]
    fn anomaly_display() {
        let anomaly = StreamAnomaly {
            step: 3,
            kind: AnomalyKind::EmptyStep,
        };
        assert_eq!(anomaly.to_string(), "step 3 contains no iterations");
    }
}
