// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Step execution over a draft.

use alloc::string::ToString;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::bitset::DenseIdBitSet;
use crate::clock::{BudgetGuard, Clock};
use crate::diagnostics::{DepsMismatch, Hotspot, insert_hotspot};
use crate::draft::Draft;
use crate::error::StepError;
use crate::exec_ir::ExecIr;
use crate::path::{FieldPath, FieldPathId};
use crate::plan::{mark_prefixes, should_run};
use crate::reads::{StateReader, diff_deps};
use crate::static_ir::StaticIr;
use crate::step::{StepId, StepKind};
use crate::value::Value;

/// Hotspots kept per pass.
const HOTSPOTS: usize = 3;

static NULL: Value = Value::Null;

/// How a run of steps ended.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ExecStatus {
    /// Every step ran.
    Completed,
    /// The execution budget ran out.
    BudgetExceeded,
    /// A writer failed.
    Failed {
        /// The failing step.
        step: StepId,
        /// What it reported.
        error: StepError,
    },
}

/// A step whose output changed; `from` is the value it replaced.
#[derive(Clone, Debug)]
pub(crate) struct Change {
    pub(crate) step: StepId,
    pub(crate) from: Option<Value>,
}

/// Inputs of one run.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ExecRequest<'a> {
    /// Steps to visit, in order.
    pub(crate) steps: &'a [StepId],
    /// Seeds for live pruning; `None` runs every visited step.
    pub(crate) prune_roots: Option<&'a [FieldPathId]>,
    /// Execution budget.
    pub(crate) budget_ms: f64,
    /// Steps between clock samples.
    pub(crate) check_interval: u32,
    /// Time each step and keep the slowest.
    pub(crate) collect_hotspots: bool,
}

/// What a run did.
#[derive(Debug)]
pub(crate) struct ExecOutput {
    pub(crate) status: ExecStatus,
    /// Writers invoked.
    pub(crate) executed: usize,
    /// Changed outputs, in execution order.
    pub(crate) changes: Vec<Change>,
    pub(crate) hotspots: Vec<Hotspot>,
    /// Traced computed steps whose reads disagree with their declared deps.
    pub(crate) deps_mismatches: Vec<DepsMismatch>,
    pub(crate) started_ms: f64,
    pub(crate) duration_ms: f64,
}

/// Runs `req.steps` against `draft`.
///
/// Returns the committed state on completion and the base state otherwise;
/// a failed or over-budget run never leaks partial writes.
///
/// With `traced`, each computed step not yet in the set has its reads
/// recorded and compared with its declared deps, then joins the set once it
/// succeeds.
pub(crate) fn execute<D: Draft>(
    ir: &StaticIr,
    exec: &ExecIr,
    mut draft: D,
    req: &ExecRequest<'_>,
    dirty: &mut DenseIdBitSet,
    mut traced: Option<&mut DenseIdBitSet>,
    clock: &dyn Clock,
) -> (ExecOutput, Value) {
    let mut guard = BudgetGuard::start(clock, req.budget_ms, req.check_interval);
    let mut out = ExecOutput {
        status: ExecStatus::Completed,
        executed: 0,
        changes: Vec::new(),
        hotspots: Vec::new(),
        deps_mismatches: Vec::new(),
        started_ms: guard.started_ms(),
        duration_ms: 0.0,
    };

    let pruning = req.prune_roots.is_some();
    dirty.clear();
    for &root in req.prune_roots.unwrap_or_default() {
        mark_prefixes(exec, dirty, root);
    }

    for &step in req.steps {
        if guard.tick() {
            out.status = ExecStatus::BudgetExceeded;
            break;
        }
        if pruning && !should_run(exec, dirty, step) {
            continue;
        }
        out.executed += 1;

        let reads = traced
            .as_deref()
            .filter(|t| !t.contains(step.as_usize()))
            .filter(|_| ir.step(step).is_some_and(|e| e.is_computed()))
            .map(|_| RefCell::new(Vec::new()));
        let started = req.collect_hotspots.then(|| clock.now_ms());
        let result = run_step(ir, exec, &mut draft, step, reads.as_ref());
        if let (Some(reads), Some(traced), true) = (reads, traced.as_deref_mut(), result.is_ok()) {
            traced.insert(step.as_usize());
            if let Some(mismatch) = check_deps(ir, exec, step, reads.into_inner()) {
                out.deps_mismatches.push(mismatch);
            }
        }
        let changed = matches!(result, Ok(Some(_)));
        if let Some(started) = started {
            let duration_ms = (clock.now_ms() - started).max(0.0);
            tracing::trace!(step = step.as_u32(), label = exec.label(step), duration_ms, changed, "step");
            insert_hotspot(
                &mut out.hotspots,
                HOTSPOTS,
                Hotspot {
                    step: step.as_u32(),
                    label: exec.label(step).to_string(),
                    duration_ms,
                    changed,
                },
            );
        }

        match result {
            Err(error) => {
                out.status = ExecStatus::Failed { step, error };
                break;
            }
            Ok(Some(from)) => {
                if pruning {
                    mark_prefixes(exec, dirty, exec.out_path(step));
                }
                out.changes.push(Change { step, from });
            }
            Ok(None) => {}
        }
    }
    dirty.clear();
    out.duration_ms = guard.elapsed_ms();

    let state = match out.status {
        ExecStatus::Completed => draft.commit(),
        ExecStatus::BudgetExceeded | ExecStatus::Failed { .. } => draft.rollback(),
    };
    (out, state)
}

/// Compares a traced step's reads with its declared deps, warning on a
/// mismatch.
fn check_deps(
    ir: &StaticIr,
    exec: &ExecIr,
    step: StepId,
    reads: Vec<FieldPath>,
) -> Option<DepsMismatch> {
    let declared: Vec<&FieldPath> = exec
        .deps(step)
        .iter()
        .filter_map(|&d| ir.paths().get(d))
        .collect();
    let diff = diff_deps(&declared, reads)?;
    tracing::warn!(
        step = step.as_u32(),
        label = exec.label(step),
        missing = ?diff.missing,
        unused = ?diff.unused,
        "computed step reads differ from its declared deps"
    );
    Some(DepsMismatch {
        step: step.as_u32(),
        label: exec.label(step).to_string(),
        diff,
    })
}

/// Runs one writer. `Ok(Some(previous))` when the output changed.
fn run_step<D: Draft>(
    ir: &StaticIr,
    exec: &ExecIr,
    draft: &mut D,
    step: StepId,
    reads: Option<&RefCell<Vec<FieldPath>>>,
) -> Result<Option<Option<Value>>, StepError> {
    let Some(entry) = ir.step(step) else {
        return Ok(None);
    };
    let Some(path) = ir.paths().get(exec.out_path(step)) else {
        return Ok(None);
    };
    let current = draft.get_at(path).unwrap_or(&NULL);
    let next = match &entry.kind {
        StepKind::Computed { derive, equals } => {
            let reader = match reads {
                Some(reads) => StateReader::recording(draft.root(), reads),
                None => StateReader::new(draft.root()),
            };
            let next = derive(&reader)?;
            let same = match equals {
                Some(equals) => equals(current, &next),
                None => current.ptr_eq(&next) || *current == next,
            };
            if same {
                return Ok(None);
            }
            next
        }
        StepKind::Link { from } => {
            let source = ir
                .paths()
                .get(*from)
                .and_then(|p| draft.get_at(p))
                .unwrap_or(&NULL);
            if current.ptr_eq(source) || current == source {
                return Ok(None);
            }
            source.clone()
        }
    };
    Ok(Some(draft.set_at(path, next)?))
}
