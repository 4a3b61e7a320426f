// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Read access for computed steps, and dependency tracing.
//!
//! Dirty mode only reruns a computed step when one of its *declared*
//! dependencies was written. A derivation that reads anything else goes stale
//! silently. With full diagnostics, the executor hands each computed step a
//! recording [`StateReader`] the first time it runs and compares what it read
//! against what it declared; the [`DepsDiff`] ends up in the pass summary.
//!
//! ```rust
//! use understory_converge::{FieldPath, StateReader, Value};
//!
//! let state = Value::object([("x", Value::from(2))]);
//! let reader = StateReader::new(&state);
//! assert_eq!(reader.get("x"), Some(&Value::from(2)));
//! assert_eq!(reader.get_at(&FieldPath::parse("x.y").unwrap()), None);
//! ```

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::path::FieldPath;
use crate::value::Value;

/// The state as a computed step sees it.
///
/// Reads through [`get`](Self::get) and [`get_at`](Self::get_at) are recorded
/// while tracing. A read covers everything below the path it names, so prefer
/// [`get_at`](Self::get_at) with the full path over walking nested values.
/// [`root`](Self::root) is never recorded.
#[derive(Copy, Clone)]
pub struct StateReader<'a> {
    root: &'a Value,
    reads: Option<&'a RefCell<Vec<FieldPath>>>,
}

impl fmt::Debug for StateReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateReader")
            .field("root", self.root)
            .field("tracing", &self.reads.is_some())
            .finish()
    }
}

impl<'a> StateReader<'a> {
    /// A reader over `root` that records nothing.
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self { root, reads: None }
    }

    /// A reader that appends every traced read to `reads`.
    pub(crate) fn recording(root: &'a Value, reads: &'a RefCell<Vec<FieldPath>>) -> Self {
        Self {
            root,
            reads: Some(reads),
        }
    }

    /// Reads the top-level field `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        if let Some(reads) = self.reads {
            if let Some(path) = FieldPath::from_segments([key]) {
                reads.borrow_mut().push(path);
            }
        }
        self.root.get(key)
    }

    /// Reads the field at `path`.
    #[must_use]
    pub fn get_at(&self, path: &FieldPath) -> Option<&'a Value> {
        if let Some(reads) = self.reads {
            reads.borrow_mut().push(path.clone());
        }
        self.root.get_at(path)
    }

    /// The whole state, untraced.
    #[must_use]
    pub fn root(&self) -> &'a Value {
        self.root
    }
}

/// Difference between what a computed step declared and what it read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepsDiff {
    /// Paths read, most specific only, sorted.
    pub reads: Vec<String>,
    /// Declared dependencies, sorted.
    pub declared: Vec<String>,
    /// Reads no declared dependency covers. Dirty mode misses writes here.
    pub missing: Vec<String>,
    /// Declared dependencies nothing was read under.
    pub unused: Vec<String>,
}

/// Compares `reads` against `declared`; `None` when they agree.
pub(crate) fn diff_deps(declared: &[&FieldPath], mut reads: Vec<FieldPath>) -> Option<DepsDiff> {
    reads.sort_unstable();
    reads.dedup();
    // Keep the most specific read along each chain.
    let specific: Vec<&FieldPath> = reads
        .iter()
        .filter(|r| !reads.iter().any(|o| o.len() > r.len() && r.is_prefix_of(o)))
        .collect();

    let mut declared: Vec<&FieldPath> = declared.to_vec();
    declared.sort_unstable();
    declared.dedup();

    let missing: Vec<String> = specific
        .iter()
        .filter(|r| !declared.iter().any(|d| d.is_prefix_of(r)))
        .map(ToString::to_string)
        .collect();
    let unused: Vec<String> = declared
        .iter()
        .filter(|d| !specific.iter().any(|r| d.is_prefix_of(r)))
        .map(ToString::to_string)
        .collect();
    if missing.is_empty() && unused.is_empty() {
        return None;
    }
    Some(DepsDiff {
        reads: specific.iter().map(ToString::to_string).collect(),
        declared: declared.iter().map(ToString::to_string).collect(),
        missing,
        unused,
    })
}
