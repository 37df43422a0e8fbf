//! The deferred task queue and its flush protocol.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, trace, warn};

use crate::backend::{Backend, Capability, ExecContext};
use crate::error::{Error, Result};
use crate::task::{IoTask, Parameter};
use crate::types::{Access, FlushParams};
use crate::writable::{FilePosition, WritableId, Writables};

/// Front door to a backend: stages tasks and executes them on flush.
///
/// `enqueue` never touches the backend. `flush` hands the queue to the
/// backend in FIFO order; tasks staged by the backend while a flush runs
/// are kept for the next flush.
pub struct IoHandler {
    backend: Box<dyn Backend>,
    access: Access,
    queue: VecDeque<IoTask>,
    writables: Writables,
    root: WritableId,
    closed: bool,
    executed: u64,
}

impl IoHandler {
    /// Wrap `backend`. The root writable is pre-positioned at `/`.
    pub fn new<B: Backend + 'static>(backend: B, access: Access) -> Self {
        Self::from_boxed(Box::new(backend), access)
    }

    pub fn from_boxed(backend: Box<dyn Backend>, access: Access) -> Self {
        let mut writables = Writables::new();
        let root = writables.insert_written(FilePosition::root());
        Self {
            backend,
            access,
            queue: VecDeque::new(),
            writables,
            root,
            closed: false,
            executed: 0,
        }
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Writable standing for the backend's root location.
    pub fn root(&self) -> WritableId {
        self.root
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn supports(&self, cap: Capability) -> bool {
        self.backend.supports(cap)
    }

    pub fn writables(&self) -> &Writables {
        &self.writables
    }

    pub fn writables_mut(&mut self) -> &mut Writables {
        &mut self.writables
    }

    /// Number of staged, not yet executed tasks.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Total number of tasks executed by this handler.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append `task` to the queue. Failures surface on the next flush.
    pub fn enqueue(&mut self, task: IoTask) {
        self.queue.push_back(task);
    }

    /// Execute every staged task in FIFO order.
    ///
    /// The first failing task aborts the pass: it and everything queued
    /// behind it are dropped and the error is returned. Effects of tasks
    /// executed before the failure stay in place.
    pub fn flush(&mut self, params: &FlushParams) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        if self.closed {
            let rejected = self.queue.len();
            self.queue.clear();
            return Err(Error::HandlerClosed(rejected));
        }

        let pending = std::mem::take(&mut self.queue);
        let mut deferred = VecDeque::new();
        debug!(
            backend = self.backend.name(),
            tasks = pending.len(),
            level = ?params.level,
            "flushing IO queue"
        );

        let mut result = Ok(());
        for task in pending {
            trace!(operation = %task.operation(), writable = task.writable().index(), "executing task");
            if let Err(e) = self.run(&task, &mut deferred) {
                warn!(operation = %task.operation(), error = %e, "task failed, aborting flush pass");
                result = Err(e);
                break;
            }
            self.executed += 1;
        }

        self.queue = deferred;
        result
    }

    /// Close the backend. Later flushes of new tasks fail.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.backend.close()
    }

    fn run(&mut self, task: &IoTask, deferred: &mut VecDeque<IoTask>) -> Result<()> {
        let operation = task.operation();
        if operation.is_write() && self.access.is_read_only() {
            return Err(Error::AccessDenied {
                operation,
                access: self.access,
            });
        }

        let target = task.writable();
        let backend = self.backend.as_mut();
        let mut ctx = ExecContext::new(&mut self.writables, deferred);
        match task.parameter() {
            Parameter::CreatePath { path } => backend.create_path(&mut ctx, target, path),
            Parameter::OpenPath { path } => backend.open_path(&mut ctx, target, path),
            Parameter::ListPaths { paths } => backend.list_paths(&mut ctx, target, paths),
            Parameter::CreateDataset {
                name,
                dtype,
                extent,
            } => backend.create_dataset(&mut ctx, target, name, *dtype, extent),
            Parameter::ExtendDataset { extent } => {
                backend.extend_dataset(&mut ctx, target, extent)
            }
            Parameter::ListDatasets { datasets } => {
                backend.list_datasets(&mut ctx, target, datasets)
            }
            Parameter::OpenDataset {
                name,
                dtype,
                extent,
            } => backend.open_dataset(&mut ctx, target, name, dtype, extent),
            Parameter::WriteDataset {
                offset,
                extent,
                dtype,
                data,
            } => backend.write_dataset(&mut ctx, target, offset, extent, *dtype, data),
            Parameter::ReadDataset {
                offset,
                extent,
                dtype,
                data,
            } => backend.read_dataset(&mut ctx, target, offset, extent, *dtype, data),
            Parameter::WriteAttribute { name, value } => {
                backend.write_attribute(&mut ctx, target, name, value)
            }
            Parameter::ReadAttribute { name, value } => {
                backend.read_attribute(&mut ctx, target, name, value)
            }
            Parameter::ListAttributes { names } => {
                backend.list_attributes(&mut ctx, target, names)
            }
            Parameter::KeepSynchronous { other } => {
                backend.keep_synchronous(&mut ctx, target, *other)
            }
            Parameter::Advance {
                mode,
                status,
                iterations,
            } => backend.advance(&mut ctx, target, *mode, status, iterations),
        }
    }
}

impl fmt::Debug for IoHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoHandler")
            .field("backend", &self.backend.name())
            .field("access", &self.access)
            .field("pending", &self.queue.len())
            .field("writables", &self.writables.len())
            .field("closed", &self.closed)
            .finish()
    }
}
