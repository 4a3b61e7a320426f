// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reusable scratch buffers for planning and pruning.

use alloc::vec::Vec;

use crate::bitset::DenseIdBitSet;
use crate::path::FieldPathId;
use crate::step::StepId;

/// Reusable scratch storage for plan computation.
///
/// Buffers retain capacity across passes; a [`ConvergeProgram`] owns one and
/// reuses it for every converge call, so steady-state planning does not
/// allocate beyond the returned plan.
///
/// [`ConvergeProgram`]: crate::ConvergeProgram
#[derive(Debug, Default)]
pub struct PlanScratch {
    /// Path ids with a dirty prefix relation (roots, their prefixes, and the
    /// prefixes of every planned step's output).
    pub(crate) dirty_prefixes: DenseIdBitSet,
    /// Steps reached by the breadth-first walk.
    pub(crate) reachable: DenseIdBitSet,
    /// Breadth-first queue of dirty prefixes.
    pub(crate) queue: Vec<FieldPathId>,
    /// Plan under construction.
    pub(crate) plan: Vec<StepId>,
}

impl PlanScratch {
    /// Creates an empty scratch buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scratch buffer sized for `paths` path ids and `steps` steps.
    #[must_use]
    pub fn with_capacity(paths: usize, steps: usize) -> Self {
        Self {
            dirty_prefixes: DenseIdBitSet::with_capacity(paths),
            reachable: DenseIdBitSet::with_capacity(steps),
            queue: Vec::with_capacity(paths),
            plan: Vec::with_capacity(steps),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.dirty_prefixes.clear();
        self.reachable.clear();
        self.queue.clear();
        self.plan.clear();
    }
}
