use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ModelError, Result};
use crate::handle::Handle;

#[derive(Debug)]
struct BufferState {
    text: Arc<str>,
    version: u64,
    unsaved: bool,
    closed: bool,
    /// Set while a working copy owns the buffer; retained buffers are never
    /// evicted.
    retained: bool,
}

/// Editable text of a compilation unit.
///
/// The buffer refers to its owner by handle only, so a live buffer never keeps
/// the owner's body resident. Readers should take a [`BufferSnapshot`], which
/// never aliases the mutable text.
pub struct Buffer {
    owner: Handle,
    state: Mutex<BufferState>,
}

/// Immutable view of a buffer at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub owner: Handle,
    pub text: Arc<str>,
    pub version: u64,
    pub has_unsaved_changes: bool,
}

impl Buffer {
    pub fn new(owner: Handle, text: impl Into<Arc<str>>) -> Self {
        Self {
            owner,
            state: Mutex::new(BufferState {
                text: text.into(),
                version: 0,
                unsaved: false,
                closed: false,
                retained: false,
            }),
        }
    }

    /// A buffer whose contents have not been written anywhere yet.
    pub fn new_unsaved(owner: Handle, text: impl Into<Arc<str>>) -> Self {
        let buffer = Self::new(owner, text);
        buffer.state.lock().unsaved = true;
        buffer
    }

    pub fn owner(&self) -> &Handle {
        &self.owner
    }

    pub fn text(&self) -> Arc<str> {
        Arc::clone(&self.state.lock().text)
    }

    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.state.lock();
        BufferSnapshot {
            owner: self.owner.clone(),
            text: Arc::clone(&state.text),
            version: state.version,
            has_unsaved_changes: state.unsaved,
        }
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.state.lock().unsaved
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_retained(&self) -> bool {
        self.state.lock().retained
    }

    pub fn set_contents(&self, text: impl Into<Arc<str>>) -> Result<()> {
        let text = text.into();
        self.edit(|_| Ok(text))
    }

    pub fn append(&self, suffix: &str) -> Result<()> {
        self.edit(|current| Ok(format!("{current}{suffix}").into()))
    }

    /// Replaces the byte range `range` with `replacement`.
    pub fn replace(&self, range: Range<usize>, replacement: &str) -> Result<()> {
        let owner = self.owner.clone();
        self.edit(|current| {
            let valid = range.start <= range.end
                && range.end <= current.len()
                && current.is_char_boundary(range.start)
                && current.is_char_boundary(range.end);
            if !valid {
                return Err(ModelError::invalid_state(
                    &owner,
                    format!("invalid buffer range {range:?}"),
                ));
            }
            let mut text = String::with_capacity(current.len() + replacement.len());
            text.push_str(&current[..range.start]);
            text.push_str(replacement);
            text.push_str(&current[range.end..]);
            Ok(text.into())
        })
    }

    /// Records that the current contents were persisted.
    pub fn mark_saved(&self) {
        self.state.lock().unsaved = false;
    }

    pub(crate) fn set_retained(&self, retained: bool) {
        self.state.lock().retained = retained;
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.retained = false;
    }

    fn edit(&self, f: impl FnOnce(&str) -> Result<Arc<str>>) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ModelError::invalid_state(&self.owner, "buffer is closed"));
        }
        let text = f(&state.text)?;
        state.text = text;
        state.version += 1;
        state.unsaved = true;
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Buffer")
            .field("owner", &self.owner)
            .field("version", &state.version)
            .field("unsaved", &state.unsaved)
            .field("closed", &state.closed)
            .finish()
    }
}
