// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flat, index-addressed form of a [`StaticIr`].
//!
//! The hot paths (planning, pruning, executing) only ever walk integer arrays.
//! Variable-length per-item lists are stored as one concatenated array plus an
//! offset array with `len + 1` entries, so the list for item `i` is
//! `items[offsets[i]..offsets[i + 1]]`.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::context::SchedulingScope;
use crate::path::FieldPathId;
use crate::static_ir::StaticIr;
use crate::step::StepId;

/// Offset-encoded lists: `offsets.len() == count + 1`.
#[derive(Clone, Debug)]
struct Lists<T> {
    offsets: Vec<u32>,
    items: Vec<T>,
}

impl<T: Copy> Lists<T> {
    fn with_capacity(count: usize) -> Self {
        let mut offsets = Vec::with_capacity(count + 1);
        offsets.push(0);
        Self {
            offsets,
            items: Vec::new(),
        }
    }

    fn push_list(&mut self, list: impl IntoIterator<Item = T>) {
        self.items.extend(list);
        self.offsets.push(
            u32::try_from(self.items.len()).expect("execution table exceeds u32 offsets"),
        );
    }

    fn get(&self, index: usize) -> &[T] {
        match (self.offsets.get(index), self.offsets.get(index + 1)) {
            (Some(&start), Some(&end)) => &self.items[start as usize..end as usize],
            _ => &[],
        }
    }
}

/// Execution tables derived from one [`StaticIr`] generation.
#[derive(Clone, Debug)]
pub struct ExecIr {
    generation: u64,
    path_count: usize,
    topo: Vec<StepId>,
    topo_immediate: Vec<StepId>,
    topo_deferred: Vec<StepId>,
    out_path: Vec<FieldPathId>,
    deferred: Vec<bool>,
    labels: Vec<Box<str>>,
    deps: Lists<FieldPathId>,
    prefixes: Lists<FieldPathId>,
    /// Per path id: steps whose output or an input lies at or below that path.
    triggers: Lists<StepId>,
    all_out_paths_shallow: bool,
}

impl ExecIr {
    /// Builds the tables for `ir`.
    ///
    /// An invalid graph yields empty orders; callers check
    /// [`StaticIr::config_error`] first.
    #[must_use]
    pub fn build(ir: &StaticIr) -> Self {
        let paths = ir.paths();
        let steps = ir.steps();

        let mut prefixes = Lists::with_capacity(paths.len());
        for (id, _) in paths.iter() {
            prefixes.push_list(paths.prefixes(id).iter().copied());
        }

        let mut deps = Lists::with_capacity(steps.len());
        for step in steps {
            deps.push_list(step.deps.iter().copied());
        }

        // (prefix, step) pairs, bucketed by prefix afterwards.
        let mut pairs: Vec<(FieldPathId, StepId)> = Vec::new();
        for step in steps {
            for &path in core::iter::once(&step.output).chain(step.deps.iter()) {
                pairs.extend(paths.prefixes(path).iter().map(|&p| (p, step.id)));
            }
        }
        pairs.sort_unstable();
        pairs.dedup();
        let mut triggers = Lists::with_capacity(paths.len());
        let mut cursor = 0;
        for (id, _) in paths.iter() {
            let start = cursor;
            while cursor < pairs.len() && pairs[cursor].0 == id {
                cursor += 1;
            }
            triggers.push_list(pairs[start..cursor].iter().map(|&(_, s)| s));
        }

        let topo = ir.topo().to_vec();
        let (topo_deferred, topo_immediate): (Vec<StepId>, Vec<StepId>) = topo
            .iter()
            .copied()
            .partition(|id| steps[id.as_usize()].is_deferred());

        Self {
            generation: ir.generation(),
            path_count: paths.len(),
            topo,
            topo_immediate,
            topo_deferred,
            out_path: steps.iter().map(|s| s.output).collect(),
            deferred: steps.iter().map(|s| s.is_deferred()).collect(),
            labels: steps.iter().map(|s| s.label.clone()).collect(),
            deps,
            prefixes,
            triggers,
            all_out_paths_shallow: steps
                .iter()
                .all(|s| paths.get(s.output).is_some_and(|p| p.is_shallow())),
        }
    }

    /// Generation of the graph these tables were built from.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.out_path.len()
    }

    /// Number of interned paths.
    #[must_use]
    pub fn path_count(&self) -> usize {
        self.path_count
    }

    /// Topological order restricted to `scope`.
    #[must_use]
    pub fn topo(&self, scope: SchedulingScope) -> &[StepId] {
        match scope {
            SchedulingScope::All => &self.topo,
            SchedulingScope::Immediate => &self.topo_immediate,
            SchedulingScope::Deferred => &self.topo_deferred,
        }
    }

    /// Returns `true` if `step` belongs to `scope`.
    #[must_use]
    pub fn is_in_scope(&self, step: StepId, scope: SchedulingScope) -> bool {
        let deferred = self.is_deferred(step);
        match scope {
            SchedulingScope::All => true,
            SchedulingScope::Immediate => !deferred,
            SchedulingScope::Deferred => deferred,
        }
    }

    /// Returns `true` if `step` is deferred.
    #[must_use]
    pub fn is_deferred(&self, step: StepId) -> bool {
        self.deferred.get(step.as_usize()).copied().unwrap_or(false)
    }

    /// Returns `true` if any step is deferred.
    #[must_use]
    pub fn has_deferred(&self) -> bool {
        !self.topo_deferred.is_empty()
    }

    /// Output path of `step`.
    #[must_use]
    pub fn out_path(&self, step: StepId) -> FieldPathId {
        self.out_path[step.as_usize()]
    }

    /// Input paths of `step`.
    #[must_use]
    pub fn deps(&self, step: StepId) -> &[FieldPathId] {
        self.deps.get(step.as_usize())
    }

    /// Prefix chain of `path`, shortest first, `path` last.
    #[must_use]
    pub fn prefixes(&self, path: FieldPathId) -> &[FieldPathId] {
        self.prefixes.get(path.as_usize())
    }

    /// Steps touching `path` or anything below it, ascending.
    #[must_use]
    pub fn triggered_steps(&self, path: FieldPathId) -> &[StepId] {
        self.triggers.get(path.as_usize())
    }

    /// Diagnostic label of `step`.
    #[must_use]
    pub fn label(&self, step: StepId) -> &str {
        self.labels.get(step.as_usize()).map_or("", |l| &**l)
    }

    /// Returns `true` if every output is a top-level field.
    #[must_use]
    pub fn all_out_paths_shallow(&self) -> bool {
        self.all_out_paths_shallow
    }
}
