//! The editing surface seen by the pipelines.
//!
//! The live document belongs to a rich-text editor that this crate does not
//! implement. Pipelines only ever see it through [`EditorSurface`]: read a
//! serialized snapshot, replace the whole content in one step, or insert
//! text at the cursor. [`MemorySurface`] is a plain in-memory implementation
//! used by the CLI and by tests.

use crate::error::PagesmithError;

/// Narrow capability interface over the rich-text editing surface.
pub trait EditorSurface: Send {
    /// Serialized markup of the current document.
    fn markup(&self) -> String;

    /// Replace the whole document. Implementations must apply this atomically.
    fn set_markup(&mut self, markup: String) -> Result<(), PagesmithError>;

    /// Insert content at the cursor and move the cursor past it.
    fn insert_at_cursor(&mut self, content: &str) -> Result<(), PagesmithError>;
}

/// An [`EditorSurface`] backed by a `String` and a byte-offset cursor.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    markup: String,
    cursor: usize,
}

impl MemorySurface {
    /// A surface holding `markup`, with the cursor at the end.
    pub fn new(markup: impl Into<String>) -> Self {
        let markup = markup.into();
        let cursor = markup.len();
        Self { markup, cursor }
    }

    /// Current cursor position as a byte offset.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor, snapping back to the previous char boundary.
    pub fn set_cursor(&mut self, offset: usize) {
        let mut offset = offset.min(self.markup.len());
        while !self.markup.is_char_boundary(offset) {
            offset -= 1;
        }
        self.cursor = offset;
    }
}

impl EditorSurface for MemorySurface {
    fn markup(&self) -> String {
        self.markup.clone()
    }

    fn set_markup(&mut self, markup: String) -> Result<(), PagesmithError> {
        self.cursor = markup.len();
        self.markup = markup;
        Ok(())
    }

    fn insert_at_cursor(&mut self, content: &str) -> Result<(), PagesmithError> {
        self.markup.insert_str(self.cursor, content);
        self.cursor += content.len();
        Ok(())
    }
}
