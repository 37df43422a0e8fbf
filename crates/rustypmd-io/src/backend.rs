//! Backend trait for pluggable storage drivers.
//!
//! A backend translates the abstract operation vocabulary into actual
//! storage access. The frontend never calls a backend directly: it stages
//! [`IoTask`](crate::IoTask)s on the [`IoHandler`](crate::IoHandler), which
//! dispatches each task to the matching method below during a flush.
//!
//! ```text
//! ┌───────────────────────────┐
//! │ Series / Iteration / ...  │  stages tasks
//! ├───────────────────────────┤
//! │  IoHandler (FIFO queue)   │  flush
//! ├───────────────────────────┤
//! │  Backend                  │  ← trait defined here
//! ├────────┬──────────────────┤
//! │ Memory │ file drivers ... │
//! └────────┴──────────────────┘
//! ```
//!
//! Every operation has a default implementation returning
//! [`Error::Unsupported`], so a driver only implements what it can do.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::task::{AdvanceMode, AdvanceStatus, IoTask, Operation, Slot};
use crate::types::{AttrValue, Datatype, Extent};
use crate::writable::{FilePosition, WritableId, Writables};

/// Capabilities a backend may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// All iterations are visible at once.
    RandomAccess,
    /// Content is exposed in discrete steps.
    Streaming,
    /// Dataset payloads can be read back.
    ReadData,
    /// Dataset payloads can be written.
    WriteData,
    /// Attributes can be read and written.
    Attributes,
}

/// Mutable view a backend gets while executing one task.
pub struct ExecContext<'a> {
    writables: &'a mut Writables,
    deferred: &'a mut VecDeque<IoTask>,
}

impl<'a> ExecContext<'a> {
    pub(crate) fn new(writables: &'a mut Writables, deferred: &'a mut VecDeque<IoTask>) -> Self {
        Self {
            writables,
            deferred,
        }
    }

    pub fn writables(&self) -> &Writables {
        self.writables
    }

    pub fn writables_mut(&mut self) -> &mut Writables {
        self.writables
    }

    /// Position of `id`, or an error if it has not been written yet.
    pub fn position(&self, id: WritableId) -> Result<FilePosition> {
        self.writables
            .position(id)
            .cloned()
            .ok_or(Error::UnresolvedPosition(id))
    }

    /// Position a create/open of `name` on `id` resolves to.
    pub fn child_position(&self, id: WritableId, name: &str) -> Result<FilePosition> {
        self.writables
            .resolve_parent_position(id)
            .map(|p| p.join(name))
            .ok_or(Error::UnresolvedPosition(id))
    }

    /// Stage a follow-up task. It runs on the next flush, not this one.
    pub fn enqueue(&mut self, task: IoTask) {
        self.deferred.push_back(task);
    }
}

/// A storage driver.
///
/// Methods receive the task's target writable and are expected to mark it
/// written (via [`ExecContext::writables_mut`]) when they create or open it.
pub trait Backend {
    /// Returns the driver name, e.g. "memory".
    fn name(&self) -> &str;

    /// Returns the set of capabilities this driver supports.
    fn capabilities(&self) -> Vec<Capability>;

    /// Check if a specific capability is supported.
    fn supports(&self, cap: Capability) -> bool {
        self.capabilities().contains(&cap)
    }

    /// Release backend resources. Called once by the handler.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn create_path(&mut self, ctx: &mut ExecContext<'_>, target: WritableId, path: &str) -> Result<()> {
        let _ = (ctx, target, path);
        Err(self.unsupported(Operation::CreatePath))
    }

    fn open_path(&mut self, ctx: &mut ExecContext<'_>, target: WritableId, path: &str) -> Result<()> {
        let _ = (ctx, target, path);
        Err(self.unsupported(Operation::OpenPath))
    }

    fn list_paths(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        paths: &Slot<Vec<String>>,
    ) -> Result<()> {
        let _ = (ctx, target, paths);
        Err(self.unsupported(Operation::ListPaths))
    }

    fn create_dataset(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        name: &str,
        dtype: Datatype,
        extent: &[u64],
    ) -> Result<()> {
        let _ = (ctx, target, name, dtype, extent);
        Err(self.unsupported(Operation::CreateDataset))
    }

    fn extend_dataset(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        extent: &[u64],
    ) -> Result<()> {
        let _ = (ctx, target, extent);
        Err(self.unsupported(Operation::ExtendDataset))
    }

    fn list_datasets(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        datasets: &Slot<Vec<String>>,
    ) -> Result<()> {
        let _ = (ctx, target, datasets);
        Err(self.unsupported(Operation::ListDatasets))
    }

    fn open_dataset(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        name: &str,
        dtype: &Slot<Datatype>,
        extent: &Slot<Extent>,
    ) -> Result<()> {
        let _ = (ctx, target, name, dtype, extent);
        Err(self.unsupported(Operation::OpenDataset))
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
        let _ = (ctx, target, offset, extent, dtype, data);
        Err(self.unsupported(Operation::WriteDataset))
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
        let _ = (ctx, target, offset, extent, dtype, data);
        Err(self.unsupported(Operation::ReadDataset))
    }

    fn write_attribute(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        name: &str,
        value: &AttrValue,
    ) -> Result<()> {
        let _ = (ctx, target, name, value);
        Err(self.unsupported(Operation::WriteAttribute))
    }

    fn read_attribute(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        name: &str,
        value: &Slot<AttrValue>,
    ) -> Result<()> {
        let _ = (ctx, target, name, value);
        Err(self.unsupported(Operation::ReadAttribute))
    }

    fn list_attributes(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        names: &Slot<Vec<String>>,
    ) -> Result<()> {
        let _ = (ctx, target, names);
        Err(self.unsupported(Operation::ListAttributes))
    }

    /// Make `target` denote the same backend object as `other`.
    fn keep_synchronous(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        other: WritableId,
    ) -> Result<()> {
        ctx.writables_mut().synchronize(target, other);
        Ok(())
    }

    /// Begin or end a step. Random-access drivers keep the default.
    fn advance(
        &mut self,
        ctx: &mut ExecContext<'_>,
        target: WritableId,
        mode: AdvanceMode,
        status: &Slot<AdvanceStatus>,
        iterations: &Slot<Vec<u64>>,
    ) -> Result<()> {
        let _ = (ctx, target, mode, iterations);
        status.fill(AdvanceStatus::RandomAccess);
        Ok(())
    }

    /// Error value for an operation this driver does not implement.
    fn unsupported(&self, operation: Operation) -> Error {
        Error::Unsupported {
            backend: self.name().to_string(),
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Parameter;

    struct Nothing;

    impl Backend for Nothing {
        fn name(&self) -> &str {
            "nothing"
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::RandomAccess]
        }
    }

    #[test]
    fn defaults_are_unsupported() {
        let mut w = Writables::new();
        let mut deferred = VecDeque::new();
        let id = w.insert(None);
        let mut ctx = ExecContext::new(&mut w, &mut deferred);
        let mut backend = Nothing;
        let err = backend.create_path(&mut ctx, id, "x").unwrap_err();
        assert!(matches!(
            err,
            Error::Unsupported {
                operation: Operation::CreatePath,
                ..
            }
        ));
        assert!(backend.supports(Capability::RandomAccess));
        assert!(!backend.supports(Capability::Streaming));
    }

    #[test]
    fn default_advance_reports_random_access() {
        let mut w = Writables::new();
        let mut deferred = VecDeque::new();
        let id = w.insert(None);
        let mut ctx = ExecContext::new(&mut w, &mut deferred);
        let status = Slot::new();
        let iterations = Slot::new();
        Nothing
            .advance(&mut ctx, id, AdvanceMode::BeginStep, &status, &iterations)
            .unwrap();
        assert_eq!(status.get(), Some(AdvanceStatus::RandomAccess));
        assert!(!iterations.is_filled());
    }

    #[test]
    fn context_defers_follow_up_tasks() {
        let mut w = Writables::new();
        let mut deferred = VecDeque::new();
        let id = w.insert(None);
        {
            let mut ctx = ExecContext::new(&mut w, &mut deferred);
            assert!(matches!(ctx.position(id), Err(Error::UnresolvedPosition(_))));
            ctx.enqueue(IoTask::new(id, Parameter::OpenPath { path: "x".into() }));
        }
        assert_eq!(deferred.len(), 1);
    }
}
