//! Collaborator contracts for reading and writing document text.
//!
//! The pipeline never owns document bytes. The active buffer belongs to the
//! editor (and is edited through its undoable transaction mechanism), every
//! other document belongs to a [`DocumentStore`].

use std::collections::BTreeMap;
use std::ops::Range;

use tracing::trace;

use crate::error::DocumentError;
use crate::patch::splice;

pub trait DocumentStore {
    /// Current content of `path`, or `None` when the store does not know it.
    fn content(&self, path: &str) -> Option<String>;

    /// Replace the content of `path`. Observable immediately after returning.
    fn write(&mut self, path: &str, content: String) -> Result<(), DocumentError>;
}

/// The document currently open in the editor.
pub trait ActiveBuffer {
    fn path(&self) -> Option<&str>;

    fn text(&self) -> &str;

    /// Apply non-overlapping `edits` as one undoable transaction. Ranges are
    /// byte offsets into the current text.
    fn transact(&mut self, edits: Vec<(Range<usize>, String)>);
}

/// Read access across the active buffer and the store.
pub struct Workspace<'a> {
    pub buffer: &'a mut dyn ActiveBuffer,
    pub store: &'a mut dyn DocumentStore,
}

impl<'a> Workspace<'a> {
    pub fn new(buffer: &'a mut dyn ActiveBuffer, store: &'a mut dyn DocumentStore) -> Self {
        Self { buffer, store }
    }

    pub fn active_path(&self) -> Option<&str> {
        self.buffer.path()
    }

    pub fn is_active(&self, target: Option<&str>) -> bool {
        match target {
            None => true,
            Some(path) => self.buffer.path() == Some(path),
        }
    }

    /// `None` reads the active buffer; an unknown path yields `None`.
    pub fn document_content(&self, target: Option<&str>) -> Option<String> {
        if self.is_active(target) {
            return Some(self.buffer.text().to_string());
        }
        target.and_then(|path| self.store.content(path))
    }
}

/// In-memory [`ActiveBuffer`] with a transaction undo stack.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    path: Option<String>,
    text: String,
    undo_stack: Vec<String>,
}

impl MemoryBuffer {
    pub fn new(path: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            path: path.map(ToString::to_string),
            text: text.into(),
            undo_stack: Vec::new(),
        }
    }

    /// Direct user typing. Goes through the undo stack like any edit.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let previous = std::mem::replace(&mut self.text, text.into());
        self.undo_stack.push(previous);
    }

    /// Revert the most recent transaction. Returns false when there is none.
    pub fn undo(&mut self) -> bool {
        match self.undo_stack.pop() {
            Some(previous) => {
                self.text = previous;
                true
            }
            None => false,
        }
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }
}

impl ActiveBuffer for MemoryBuffer {
    fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn transact(&mut self, mut edits: Vec<(Range<usize>, String)>) {
        if edits.is_empty() {
            return;
        }
        edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
        let mut next = self.text.clone();
        for (range, replacement) in edits {
            next = splice(&next, range, &replacement);
        }
        trace!(path = ?self.path, "buffer transaction committed");
        let previous = std::mem::replace(&mut self.text, next);
        self.undo_stack.push(previous);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    docs: BTreeMap<String, String>,
    writes: usize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.docs.insert(path.into(), content.into());
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.docs.insert(path.into(), content.into());
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn content(&self, path: &str) -> Option<String> {
        self.docs.get(path).cloned()
    }

    fn write(&mut self, path: &str, content: String) -> Result<(), DocumentError> {
        let Some(slot) = self.docs.get_mut(path) else {
            return Err(DocumentError::TargetNotFound(path.to_string()));
        };
        *slot = content;
        self.writes += 1;
        Ok(())
    }
}
