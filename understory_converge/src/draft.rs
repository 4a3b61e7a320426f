// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mutable working copies of the state during a pass.
//!
//! A pass writes into a [`Draft`] and then either commits it (the result
//! becomes the new state) or rolls it back (the base state comes back
//! unchanged). Two strategies implement the same contract:
//!
//! - [`CowDraft`] keeps the base and copies containers along each written
//!   path; rollback just returns the base.
//! - [`ShallowInPlaceDraft`] mutates the state it was given and keeps an undo
//!   log of top-level entries; rollback replays the log backwards. It avoids
//!   copying the root object when the engine owns the only reference.

use alloc::vec::Vec;

use crate::error::DraftError;
use crate::path::FieldPath;
use crate::value::Value;

/// A working copy of the state.
pub trait Draft {
    /// The current contents.
    fn root(&self) -> &Value;

    /// Reads `path` from the current contents.
    fn get_at(&self, path: &FieldPath) -> Option<&Value> {
        self.root().get_at(path)
    }

    /// Writes `value` at `path`, returning the previous value there.
    fn set_at(&mut self, path: &FieldPath, value: Value) -> Result<Option<Value>, DraftError>;

    /// Finishes the pass, returning the written state.
    fn commit(self) -> Value;

    /// Abandons the pass, returning the base state.
    fn rollback(self) -> Value;
}

/// Copy-on-write draft over a retained base.
///
/// ```rust
/// use understory_converge::{CowDraft, Draft, FieldPath, Value};
///
/// let base = Value::object([("x", Value::from(1))]);
/// let mut draft = CowDraft::new(base.clone());
/// draft.set_at(&FieldPath::parse("x").unwrap(), Value::from(2)).unwrap();
/// assert_eq!(draft.root().get("x"), Some(&Value::from(2)));
/// assert!(draft.rollback().ptr_eq(&base));
/// ```
#[derive(Clone, Debug)]
pub struct CowDraft {
    base: Value,
    current: Value,
}

impl CowDraft {
    /// Starts a draft from `base`.
    #[must_use]
    pub fn new(base: Value) -> Self {
        Self {
            current: base.clone(),
            base,
        }
    }
}

impl Draft for CowDraft {
    fn root(&self) -> &Value {
        &self.current
    }

    fn set_at(&mut self, path: &FieldPath, value: Value) -> Result<Option<Value>, DraftError> {
        self.current.set_at(path, value)
    }

    fn commit(self) -> Value {
        self.current
    }

    fn rollback(self) -> Value {
        self.base
    }
}

/// In-place draft with a top-level undo log.
///
/// Each write records the previous value of the top-level entry it touches;
/// the record is a reference-count bump, not a copy. A root that is not an
/// object is kept whole, since the first write replaces it with one.
#[derive(Clone, Debug)]
pub struct ShallowInPlaceDraft {
    root: Value,
    undo: Vec<(FieldPath, Option<Value>)>,
    non_object_base: Option<Value>,
}

impl ShallowInPlaceDraft {
    /// Starts a draft that mutates `state` directly.
    #[must_use]
    pub fn new(state: Value) -> Self {
        let non_object_base = state.as_object().is_none().then(|| state.clone());
        Self {
            root: state,
            undo: Vec::new(),
            non_object_base,
        }
    }

    /// Number of logged writes.
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }
}

impl Draft for ShallowInPlaceDraft {
    fn root(&self) -> &Value {
        &self.root
    }

    fn set_at(&mut self, path: &FieldPath, value: Value) -> Result<Option<Value>, DraftError> {
        let top = FieldPath::from_segments(path.segments().first().cloned())
            .ok_or(DraftError::EmptyPath)?;
        let saved = self.root.get_at(&top).cloned();
        let previous = self.root.set_at(path, value)?;
        self.undo.push((top, saved));
        Ok(previous)
    }

    fn commit(self) -> Value {
        self.root
    }

    fn rollback(mut self) -> Value {
        if let Some(base) = self.non_object_base {
            return base;
        }
        while let Some((top, saved)) = self.undo.pop() {
            match saved {
                Some(value) => {
                    // The entry existed, so its parent is the root object.
                    let _ = self.root.set_at(&top, value);
                }
                None => {
                    self.root.remove_at(&top);
                }
            }
        }
        self.root
    }
}
