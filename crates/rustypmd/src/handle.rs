//! Shared access to a series' IO handler.

use std::cell::RefCell;
use std::rc::Rc;

use rustypmd_io::{
    Access, Capability, FilePosition, FlushParams, IoHandler, IoTask, Parameter, WritableId,
};

use crate::error::Result;

/// Handle to the IO handler, shared by every entity of one series.
///
/// The handler's lifetime is tied to the series; entities only hold a
/// clone of this handle and the [`WritableId`] of their own slot.
#[derive(Clone)]
pub(crate) struct IoHandle(Rc<RefCell<IoHandler>>);

impl IoHandle {
    pub(crate) fn new(handler: IoHandler) -> Self {
        IoHandle(Rc::new(RefCell::new(handler)))
    }

    pub(crate) fn access(&self) -> Access {
        self.0.borrow().access()
    }

    pub(crate) fn supports(&self, cap: Capability) -> bool {
        self.0.borrow().supports(cap)
    }

    pub(crate) fn root(&self) -> WritableId {
        self.0.borrow().root()
    }

    /// Stage `parameter` against `target`.
    pub(crate) fn stage(&self, target: WritableId, parameter: Parameter) {
        self.0.borrow_mut().enqueue(IoTask::new(target, parameter));
    }

    pub(crate) fn flush(&self, params: &FlushParams) -> Result<()> {
        self.0.borrow_mut().flush(params)?;
        Ok(())
    }

    pub(crate) fn close(&self) -> Result<()> {
        self.0.borrow_mut().close()?;
        Ok(())
    }

    pub(crate) fn new_writable(&self, parent: Option<WritableId>) -> WritableId {
        self.0.borrow_mut().writables_mut().insert(parent)
    }

    pub(crate) fn written(&self, id: WritableId) -> bool {
        self.0.borrow().writables().get(id).written
    }

    pub(crate) fn set_written(&self, id: WritableId, written: bool) {
        self.0.borrow_mut().writables_mut().get_mut(id).written = written;
    }

    pub(crate) fn parent(&self, id: WritableId) -> Option<WritableId> {
        self.0.borrow().writables().get(id).parent
    }

    pub(crate) fn set_parent(&self, id: WritableId, parent: Option<WritableId>) {
        self.0.borrow_mut().writables_mut().set_parent(id, parent);
    }

    pub(crate) fn position(&self, id: WritableId) -> Option<FilePosition> {
        self.0.borrow().writables().position(id).cloned()
    }

    pub(crate) fn pending(&self) -> usize {
        self.0.borrow().pending()
    }
}
