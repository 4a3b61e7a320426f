// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The seam between the engine and the state owner.

use alloc::vec::Vec;

use crate::path::{FieldPath, FieldPathId};
use crate::step::StepId;
use crate::value::Value;

/// Which kind of step produced a patch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatchReason {
    /// A computed step.
    Computed,
    /// A link step.
    Link,
}

/// One field change produced by a converge pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchRecord<'a> {
    /// Interned output path.
    pub path_id: FieldPathId,
    /// Output path.
    pub path: &'a FieldPath,
    /// Kind of the writing step.
    pub reason: PatchReason,
    /// Value before the pass, `None` if the field was absent.
    pub from: Option<&'a Value>,
    /// Value after the pass.
    pub to: &'a Value,
    /// The writing step.
    pub step: StepId,
    /// The writing step's label.
    pub step_label: &'a str,
}

/// Owner of the state being converged.
///
/// The engine reads the base state from [`draft`](Self::draft), hands the
/// result back through [`set_draft`](Self::set_draft), and reports each
/// changed field through [`record_patch`](Self::record_patch). Patches are
/// only reported for passes that complete; a degraded pass reports none and
/// restores the base state.
pub trait ConvergeHost {
    /// The current state.
    fn draft(&self) -> &Value;

    /// Replaces the current state.
    fn set_draft(&mut self, state: Value);

    /// Takes the current state out for in-place mutation.
    ///
    /// The default clones, which is cheap for the reference-counted tree.
    /// Hosts that can give up ownership should move the state out instead.
    fn take_draft(&mut self) -> Value {
        self.draft().clone()
    }

    /// Receives one committed field change.
    fn record_patch(&mut self, patch: PatchRecord<'_>);
}

/// A committed patch, owned.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedPatch {
    /// Output path.
    pub path: FieldPath,
    /// Kind of the writing step.
    pub reason: PatchReason,
    /// Previous value.
    pub from: Option<Value>,
    /// New value.
    pub to: Value,
    /// The writing step.
    pub step: StepId,
}

/// A host that keeps its state in memory and records every patch.
///
/// ```rust
/// use understory_converge::{ConvergeHost, RecordingHost, Value};
///
/// let mut host = RecordingHost::new(Value::object([("x", Value::from(1))]));
/// let state = host.take_draft();
/// host.set_draft(state);
/// assert!(host.patches().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct RecordingHost {
    state: Value,
    patches: Vec<OwnedPatch>,
}

impl RecordingHost {
    /// Creates a host holding `state`.
    #[must_use]
    pub fn new(state: Value) -> Self {
        Self {
            state,
            patches: Vec::new(),
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> &Value {
        &self.state
    }

    /// Replaces the state without recording anything, as a transaction would.
    pub fn write(&mut self, state: Value) {
        self.state = state;
    }

    /// Patches recorded so far.
    #[must_use]
    pub fn patches(&self) -> &[OwnedPatch] {
        &self.patches
    }

    /// Returns and clears the recorded patches.
    pub fn take_patches(&mut self) -> Vec<OwnedPatch> {
        core::mem::take(&mut self.patches)
    }
}

impl ConvergeHost for RecordingHost {
    fn draft(&self) -> &Value {
        &self.state
    }

    fn set_draft(&mut self, state: Value) {
        self.state = state;
    }

    fn take_draft(&mut self) -> Value {
        core::mem::take(&mut self.state)
    }

    fn record_patch(&mut self, patch: PatchRecord<'_>) {
        self.patches.push(OwnedPatch {
            path: patch.path.clone(),
            reason: patch.reason,
            from: patch.from.cloned(),
            to: patch.to.clone(),
            step: patch.step,
        });
    }
}
