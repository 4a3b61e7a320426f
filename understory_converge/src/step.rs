// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Derived-field steps.

use alloc::boxed::Box;
use core::fmt;

use smallvec::SmallVec;

use crate::error::StepError;
use crate::path::FieldPathId;
use crate::reads::StateReader;
use crate::value::Value;

/// Identifier of a step: its declaration index within one graph generation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct StepId(u32);

impl StepId {
    /// Creates a step id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns this id as a `usize` index.
    #[inline]
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// When a step may run under time slicing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Scheduling {
    /// Runs in the same pass as the write that dirtied it.
    #[default]
    Immediate,
    /// May be postponed to a later deferred pass.
    Deferred,
}

/// Derivation function of a computed step: reads the draft, returns the new value.
pub type DeriveFn = dyn Fn(&StateReader<'_>) -> Result<Value, StepError>;

/// Custom equality for a computed step's output.
pub type EqualsFn = dyn Fn(&Value, &Value) -> bool;

/// What a step does.
pub enum StepKind {
    /// Writes `derive(state)` to the output path.
    Computed {
        /// The derivation.
        derive: Box<DeriveFn>,
        /// Output equality; `PartialEq` when `None`.
        equals: Option<Box<EqualsFn>>,
    },
    /// Copies the value at `from` to the output path.
    Link {
        /// Source path.
        from: FieldPathId,
    },
}

impl fmt::Debug for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Computed { equals, .. } => f
                .debug_struct("Computed")
                .field("custom_equals", &equals.is_some())
                .finish_non_exhaustive(),
            Self::Link { from } => f.debug_struct("Link").field("from", from).finish(),
        }
    }
}

/// One compiled step of the graph.
#[derive(Debug)]
pub struct StepEntry {
    /// Declaration index.
    pub id: StepId,
    /// Computed or link.
    pub kind: StepKind,
    /// The single field this step writes.
    pub output: FieldPathId,
    /// Fields this step reads. For links this is exactly `[from]`.
    pub deps: SmallVec<[FieldPathId; 4]>,
    /// Time-slicing class.
    pub scheduling: Scheduling,
    /// Diagnostic label, `computed:<path>` or `link:<path>`.
    pub label: Box<str>,
}

impl StepEntry {
    /// Returns `true` for a computed step.
    #[must_use]
    pub fn is_computed(&self) -> bool {
        matches!(self.kind, StepKind::Computed { .. })
    }

    /// Returns `true` if the step is deferred under time slicing.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.scheduling == Scheduling::Deferred
    }
}
