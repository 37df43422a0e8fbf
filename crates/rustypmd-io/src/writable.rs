//! Written/locator/parent bookkeeping for persistent entities.
//!
//! Every entity of the object model owns one [`Writable`] slot in the
//! [`Writables`] arena held by the IO handler. Entities refer to their slot
//! by [`WritableId`]; the parent link is another id, never an owning edge,
//! so a component and its record cannot form a lifetime cycle.

use std::fmt;

/// Index of a writable slot in the [`Writables`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WritableId(usize);

impl WritableId {
    /// Position of this slot in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Backend-assigned locator of a written entity.
///
/// Opaque to the frontend. Backends in this workspace use `/`-separated
/// paths rooted at `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilePosition(String);

impl FilePosition {
    /// The root locator `/`.
    pub fn root() -> Self {
        FilePosition("/".to_string())
    }

    pub fn new(path: impl Into<String>) -> Self {
        FilePosition(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Locator of the child `name` below `self`.
    pub fn join(&self, name: &str) -> Self {
        let name = name.trim_matches('/');
        if self.0.ends_with('/') {
            FilePosition(format!("{}{name}", self.0))
        } else {
            FilePosition(format!("{}/{name}", self.0))
        }
    }

    /// Non-empty path segments from the root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for FilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of one persistent entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Writable {
    /// Whether the entity has been committed to the backend.
    pub written: bool,
    /// Locator assigned by the backend, meaningful once `written`.
    pub file_position: Option<FilePosition>,
    /// Owning entity, used to resolve relative names.
    pub parent: Option<WritableId>,
}

/// Append-only arena of writable slots.
///
/// Slots are never removed, so every id handed out stays valid for the
/// lifetime of the arena.
#[derive(Debug, Default)]
pub struct Writables {
    slots: Vec<Writable>,
}

impl Writables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh, unwritten slot below `parent`.
    pub fn insert(&mut self, parent: Option<WritableId>) -> WritableId {
        let id = WritableId(self.slots.len());
        self.slots.push(Writable {
            written: false,
            file_position: None,
            parent,
        });
        id
    }

    /// Allocate a slot that is already written at `position`.
    pub fn insert_written(&mut self, position: FilePosition) -> WritableId {
        let id = WritableId(self.slots.len());
        self.slots.push(Writable {
            written: true,
            file_position: Some(position),
            parent: None,
        });
        id
    }

    pub fn get(&self, id: WritableId) -> &Writable {
        &self.slots[id.0]
    }

    pub fn get_mut(&mut self, id: WritableId) -> &mut Writable {
        &mut self.slots[id.0]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn set_parent(&mut self, id: WritableId, parent: Option<WritableId>) {
        self.slots[id.0].parent = parent;
    }

    /// Mark `id` written at `position`.
    pub fn mark_written(&mut self, id: WritableId, position: FilePosition) {
        let slot = &mut self.slots[id.0];
        slot.file_position = Some(position);
        slot.written = true;
    }

    /// File position of `id` itself, if it has one.
    pub fn position(&self, id: WritableId) -> Option<&FilePosition> {
        self.slots[id.0].file_position.as_ref()
    }

    /// Walk the parent chain of `id` and return the first file position found.
    ///
    /// Used to place children: a create/open operation on `id` lands at
    /// `resolve_parent_position(id).join(name)`.
    pub fn resolve_parent_position(&self, id: WritableId) -> Option<&FilePosition> {
        let mut cursor = self.slots[id.0].parent;
        while let Some(p) = cursor {
            let slot = &self.slots[p.0];
            if let Some(pos) = slot.file_position.as_ref() {
                return Some(pos);
            }
            cursor = slot.parent;
        }
        None
    }

    /// Copy the locator and written flag of `source` onto `target`.
    pub fn synchronize(&mut self, target: WritableId, source: WritableId) {
        let (written, position) = {
            let src = &self.slots[source.0];
            (src.written, src.file_position.clone())
        };
        let dst = &mut self.slots[target.0];
        dst.written = written;
        dst.file_position = position;
    }
}
