// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Plan computation: which steps a set of dirty roots can affect.
//!
//! A step is affected when any prefix of its output or of one of its inputs is
//! dirty. Roots mark all of their prefixes dirty, and every affected step marks
//! the prefixes of its output, so the closure follows derived chains.
//!
//! Two strategies produce the same plan:
//!
//! - a direct scan of the scope in topological order, cheap for small graphs
//!   and required when the caller restricts the scope to an explicit step list;
//! - a breadth-first walk over the prefix trigger index, which only touches
//!   the affected part of large graphs.
//!
//! Either way the plan is the scope's topological order filtered to the
//! affected steps; it is never re-sorted.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::bitset::DenseIdBitSet;
use crate::clock::BudgetGuard;
use crate::context::SchedulingScope;
use crate::exec_ir::ExecIr;
use crate::path::FieldPathId;
use crate::scratch::PlanScratch;
use crate::step::StepId;

/// An ordered list of steps to execute. Cheap to clone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvergePlan(Arc<[StepId]>);

impl ConvergePlan {
    /// The steps, in execution order.
    #[must_use]
    pub fn steps(&self) -> &[StepId] {
        &self.0
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the plan runs nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ConvergePlan {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl From<&[StepId]> for ConvergePlan {
    fn from(steps: &[StepId]) -> Self {
        Self(Arc::from(steps))
    }
}

impl From<Vec<StepId>> for ConvergePlan {
    fn from(steps: Vec<StepId>) -> Self {
        Self(Arc::from(steps))
    }
}

/// Inputs of one plan computation.
#[derive(Copy, Clone, Debug)]
pub(crate) struct PlanRequest<'a> {
    /// Canonical dirty roots.
    pub(crate) roots: &'a [FieldPathId],
    /// Scheduling scope of the pass.
    pub(crate) scope: SchedulingScope,
    /// The scope's steps in topological order.
    pub(crate) scope_steps: &'a [StepId],
    /// Forces the direct scan (explicit step subsets).
    pub(crate) force_scan: bool,
    /// Graphs below this many steps use the direct scan.
    pub(crate) small_graph_steps: usize,
}

/// Marks every prefix of `path` dirty.
#[inline]
pub(crate) fn mark_prefixes(exec: &ExecIr, dirty: &mut DenseIdBitSet, path: FieldPathId) {
    for p in exec.prefixes(path) {
        dirty.insert(p.as_usize());
    }
}

#[inline]
fn has_dirty_prefix(exec: &ExecIr, dirty: &DenseIdBitSet, path: FieldPathId) -> bool {
    exec.prefixes(path).iter().any(|p| dirty.contains(p.as_usize()))
}

/// Returns `true` if `step` reads or writes under a dirty prefix.
pub(crate) fn should_run(exec: &ExecIr, dirty: &DenseIdBitSet, step: StepId) -> bool {
    has_dirty_prefix(exec, dirty, exec.out_path(step))
        || exec
            .deps(step)
            .iter()
            .any(|&d| has_dirty_prefix(exec, dirty, d))
}

/// Computes the plan for `req`.
///
/// With a `guard`, the decision budget is sampled while planning; `None` means
/// the budget ran out and no plan was produced.
pub(crate) fn compute_plan(
    exec: &ExecIr,
    scratch: &mut PlanScratch,
    req: &PlanRequest<'_>,
    mut guard: Option<&mut BudgetGuard<'_>>,
) -> Option<ConvergePlan> {
    scratch.reset();
    let small = req.force_scan || exec.step_count() < req.small_graph_steps;
    let finished = if small {
        scan(exec, scratch, req, &mut guard)
    } else {
        walk(exec, scratch, req, &mut guard)
    };
    let plan = finished.then(|| ConvergePlan::from(scratch.plan.as_slice()));
    scratch.reset();
    plan
}

fn sample(guard: &mut Option<&mut BudgetGuard<'_>>) -> bool {
    guard.as_mut().is_some_and(|g| g.tick())
}

fn scan(
    exec: &ExecIr,
    scratch: &mut PlanScratch,
    req: &PlanRequest<'_>,
    guard: &mut Option<&mut BudgetGuard<'_>>,
) -> bool {
    for &root in req.roots {
        mark_prefixes(exec, &mut scratch.dirty_prefixes, root);
    }
    for &step in req.scope_steps {
        if sample(guard) {
            return false;
        }
        if !should_run(exec, &scratch.dirty_prefixes, step) {
            continue;
        }
        scratch.plan.push(step);
        mark_prefixes(exec, &mut scratch.dirty_prefixes, exec.out_path(step));
    }
    true
}

fn enqueue_prefixes(exec: &ExecIr, scratch: &mut PlanScratch, path: FieldPathId) {
    for &p in exec.prefixes(path) {
        if scratch.dirty_prefixes.insert(p.as_usize()) {
            scratch.queue.push(p);
        }
    }
}

fn walk(
    exec: &ExecIr,
    scratch: &mut PlanScratch,
    req: &PlanRequest<'_>,
    guard: &mut Option<&mut BudgetGuard<'_>>,
) -> bool {
    for &root in req.roots {
        enqueue_prefixes(exec, scratch, root);
    }
    let mut cursor = 0;
    while let Some(&prefix) = scratch.queue.get(cursor) {
        cursor += 1;
        if sample(guard) {
            return false;
        }
        for &step in exec.triggered_steps(prefix) {
            if !exec.is_in_scope(step, req.scope) {
                continue;
            }
            if scratch.reachable.insert(step.as_usize()) {
                enqueue_prefixes(exec, scratch, exec.out_path(step));
            }
        }
    }
    let reachable = &scratch.reachable;
    scratch.plan.extend(
        req.scope_steps
            .iter()
            .copied()
            .filter(|s| reachable.contains(s.as_usize())),
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StepError;
    use crate::path::FieldPathRegistry;
    use crate::reads::StateReader;
    use crate::static_ir::GraphBuilder;
    use crate::value::Value;
    use alloc::format;
    use alloc::string::ToString;

    fn noop(_: &StateReader<'_>) -> Result<Value, StepError> {
        Ok(Value::Null)
    }

    /// `in -> s0 -> s1 -> ... -> s{n-1}` plus an unrelated `other -> t`.
    fn chain(n: usize) -> (ExecIr, FieldPathRegistry) {
        let mut g = GraphBuilder::new();
        for i in 0..n {
            let input = if i == 0 { "in".to_string() } else { format!("s{}", i - 1) };
            g.computed(&format!("s{i}"), &[input.as_str()], noop).unwrap();
        }
        g.computed("t", &["other"], noop).unwrap();
        let ir = g.build(1);
        (ExecIr::build(&ir), ir.paths().clone())
    }

    fn request<'a>(exec: &'a ExecIr, roots: &'a [FieldPathId], small: usize) -> PlanRequest<'a> {
        PlanRequest {
            roots,
            scope: SchedulingScope::All,
            scope_steps: exec.topo(SchedulingScope::All),
            force_scan: false,
            small_graph_steps: small,
        }
    }

    #[test]
    fn scan_and_walk_agree() {
        let (exec, paths) = chain(40);
        let mut scratch = PlanScratch::new();
        let roots = [paths.lookup_str("s10").unwrap()];

        let scanned = compute_plan(&exec, &mut scratch, &request(&exec, &roots, usize::MAX), None).unwrap();
        let walked = compute_plan(&exec, &mut scratch, &request(&exec, &roots, 0), None).unwrap();
        assert_eq!(scanned, walked);
        // s10 itself plus s11..s39.
        assert_eq!(scanned.len(), 30);
        assert_eq!(scanned.steps()[0], StepId::new(10));
    }

    #[test]
    fn unrelated_roots_plan_nothing_from_the_chain() {
        let (exec, paths) = chain(4);
        let mut scratch = PlanScratch::new();
        let roots = [paths.lookup_str("other").unwrap()];
        let plan = compute_plan(&exec, &mut scratch, &request(&exec, &roots, 32), None).unwrap();
        assert_eq!(plan.steps(), &[StepId::new(4)]);
    }

    #[test]
    fn scope_filters_the_walk() {
        let mut g = GraphBuilder::new();
        let a = g.computed("a", &["in"], noop).unwrap();
        let b = g.computed("b", &["a"], noop).unwrap();
        g.deferred(b);
        let ir = g.build(1);
        let exec = ExecIr::build(&ir);
        let roots = [ir.paths().lookup_str("in").unwrap()];
        let mut scratch = PlanScratch::new();
        let req = PlanRequest {
            roots: &roots,
            scope: SchedulingScope::Immediate,
            scope_steps: exec.topo(SchedulingScope::Immediate),
            force_scan: false,
            small_graph_steps: 0,
        };
        let plan = compute_plan(&exec, &mut scratch, &req, None).unwrap();
        assert_eq!(plan.steps(), &[a]);
    }

    #[test]
    fn exhausted_decision_budget_cuts_off() {
        let (exec, paths) = chain(100);
        let mut scratch = PlanScratch::new();
        let roots = [paths.lookup_str("in").unwrap()];
        let clock = ManualClock::new(0.0);
        let mut guard = BudgetGuard::start(&clock, 1.0, 1);
        clock.advance(5.0);
        let plan = compute_plan(&exec, &mut scratch, &request(&exec, &roots, 0), Some(&mut guard));
        assert!(plan.is_none());
    }
}
