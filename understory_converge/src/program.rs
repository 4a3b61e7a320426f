// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The converge entry point.
//!
//! A pass moves through `Deciding → Planning → Executing` and ends in exactly
//! one of `Converged`, `Noop` or `Degraded`. Writes are staged in a draft and
//! only handed to the host, with their patches, when execution completes; a
//! degraded pass hands back the untouched base state.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::bitset::DenseIdBitSet;
use crate::cache::{CacheDisableReason, CacheMissReason};
use crate::config::{ConvergeConfig, DiagnosticsLevel};
use crate::context::{ConvergeContext, ExecutionMode, RequestedMode, SchedulingScope};
use crate::decide::{DecideInput, decide, prepare_cache};
use crate::diagnostics::{
    DecisionReason, DecisionSummary, DirtySummary, ErrorSummary, OutcomeTag, StepStats,
    TimeSlicingSummary,
};
use crate::dirty::resolve_dirty_roots;
use crate::draft::{CowDraft, ShallowInPlaceDraft};
use crate::error::ConfigError;
use crate::exec_ir::ExecIr;
use crate::executor::{ExecOutput, ExecRequest, ExecStatus, execute};
use crate::host::{ConvergeHost, PatchReason, PatchRecord};
use crate::scratch::PlanScratch;
use crate::static_ir::StaticIr;
use crate::step::StepId;
use crate::value::Value;

/// Why a pass was rolled back.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    /// The execution budget ran out.
    BudgetExceeded,
    /// A writer failed.
    RuntimeError,
}

/// How a pass ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// The pass completed and changed `patch_count` fields.
    Converged {
        /// Number of patches reported to the host.
        patch_count: usize,
    },
    /// The pass completed without changing anything.
    Noop,
    /// The pass was rolled back; the host state is the base state.
    Degraded {
        /// Why.
        reason: DegradeReason,
        /// The writer failure, for [`DegradeReason::RuntimeError`].
        error: Option<ErrorSummary>,
    },
}

impl ConvergeOutcome {
    /// The serializable tag of this outcome.
    #[must_use]
    pub fn tag(&self) -> OutcomeTag {
        match self {
            Self::Converged { .. } => OutcomeTag::Converged,
            Self::Noop => OutcomeTag::Noop,
            Self::Degraded { .. } => OutcomeTag::Degraded,
        }
    }

    /// Returns `true` for [`ConvergeOutcome::Degraded`].
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Result of one converge call.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvergeReport {
    /// How the pass ended.
    pub outcome: ConvergeOutcome,
    /// The mode that ran.
    pub mode: ExecutionMode,
    /// Evidence, unless diagnostics are off.
    pub decision: Option<DecisionSummary>,
}

/// A compiled graph plus the per-graph state the engine reuses across calls.
///
/// ```rust
/// use understory_converge::{
///     ConvergeContext, ConvergeOutcome, ConvergeProgram, DirtyInput, DirtyPath, GraphBuilder,
///     ManualClock, RecordingHost, Value,
/// };
///
/// let mut graph = GraphBuilder::new();
/// graph
///     .computed("double", &["x"], |s| {
///         Ok(Value::from(s.get("x").and_then(Value::as_f64).unwrap_or(0.0) * 2.0))
///     })
///     .unwrap();
/// let mut program = ConvergeProgram::new(graph.build(1));
///
/// let clock = ManualClock::new(0.0);
/// let mut host = RecordingHost::new(Value::object([("x", Value::from(4))]));
/// let report = program.converge(ConvergeContext::new(&clock), &mut host).unwrap();
/// assert_eq!(report.outcome, ConvergeOutcome::Converged { patch_count: 1 });
/// assert_eq!(host.state().get("double"), Some(&Value::from(8)));
///
/// host.write(Value::object([("x", Value::from(5)), ("double", Value::from(8))]));
/// let written = [DirtyPath::Dotted("x")];
/// let ctx = ConvergeContext::new(&clock)
///     .txn_seq(2)
///     .dirty(DirtyInput::Paths(&written));
/// program.converge(ctx, &mut host).unwrap();
/// assert_eq!(host.state().get("double"), Some(&Value::from(10)));
/// ```
#[derive(Debug)]
pub struct ConvergeProgram {
    ir: StaticIr,
    exec: Option<ExecIr>,
    config: ConvergeConfig,
    scratch: PlanScratch,
    live_dirty: DenseIdBitSet,
    subset_bits: DenseIdBitSet,
    subset: Vec<StepId>,
    traced_steps: DenseIdBitSet,
}

impl ConvergeProgram {
    /// Wraps `ir` with the default configuration.
    #[must_use]
    pub fn new(ir: StaticIr) -> Self {
        Self::with_config(ir, ConvergeConfig::default())
    }

    /// Wraps `ir` with `config`.
    #[must_use]
    pub fn with_config(ir: StaticIr, config: ConvergeConfig) -> Self {
        let scratch = PlanScratch::with_capacity(ir.paths().len(), ir.len());
        Self {
            ir,
            exec: None,
            config,
            scratch,
            live_dirty: DenseIdBitSet::default(),
            subset_bits: DenseIdBitSet::default(),
            subset: Vec::new(),
            traced_steps: DenseIdBitSet::default(),
        }
    }

    /// The compiled graph.
    #[must_use]
    pub fn static_ir(&self) -> &StaticIr {
        &self.ir
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &ConvergeConfig {
        &self.config
    }

    /// Replaces the graph. Execution tables are rebuilt on next use and
    /// dependency tracing starts over.
    ///
    /// Plan caches notice the new generation on their next pass.
    pub fn set_graph(&mut self, ir: StaticIr) {
        self.ir = ir;
        self.exec = None;
        self.traced_steps.clear();
    }

    /// Execution tables for the current graph, rebuilt when its generation
    /// changed.
    pub fn exec_ir(&mut self) -> &ExecIr {
        sync_exec(&self.ir, &mut self.exec)
    }

    /// Runs one converge pass over `host`.
    ///
    /// # Errors
    ///
    /// Returns the graph's [`ConfigError`] before touching the host when the
    /// graph has multiple writers for a field or a cycle.
    pub fn converge<H: ConvergeHost + ?Sized>(
        &mut self,
        ctx: ConvergeContext<'_>,
        host: &mut H,
    ) -> Result<ConvergeReport, ConfigError> {
        let Self {
            ir,
            exec,
            config,
            scratch,
            live_dirty,
            subset_bits,
            subset,
            traced_steps,
        } = self;

        if let Some(err) = ir.config_error() {
            tracing::error!(code = err.code(), error = %err, "converge aborted: invalid graph");
            return Err(err.clone());
        }
        let exec: &ExecIr = sync_exec(ir, exec);

        let explicit_subset = ctx.scope_step_ids.is_some();
        let scope_steps: &[StepId] = match ctx.scope_step_ids {
            Some(ids) => {
                subset_bits.clear();
                for id in ids {
                    subset_bits.insert(id.as_usize());
                }
                subset.clear();
                subset.extend(
                    exec.topo(ctx.scope)
                        .iter()
                        .copied()
                        .filter(|s| subset_bits.contains(s.as_usize())),
                );
                subset.as_slice()
            }
            None => exec.topo(ctx.scope),
        };

        let ConvergeContext {
            txn_seq,
            dirty,
            requested_mode,
            scope,
            budget_ms,
            decision_budget_ms,
            plan_cache: mut cache,
            generation,
            cache_miss_hint,
            clock,
            ..
        } = ctx;

        let (miss_hint, bumped) = match cache.as_deref_mut() {
            Some(cache) => prepare_cache(cache, ir.generation(), generation, cache_miss_hint, config),
            None => (
                cache_miss_hint,
                cache_miss_hint == Some(CacheMissReason::GenerationBumped),
            ),
        };

        let input = DecideInput {
            exec,
            paths: ir.paths(),
            config,
            txn_seq,
            dirty,
            requested: requested_mode,
            scope,
            scope_steps,
            explicit_subset,
            // Only a finite, positive budget on an auto pass limits planning.
            decision_budget_ms: decision_budget_ms
                .filter(|b| requested_mode == RequestedMode::Auto && b.is_finite() && *b > 0.0),
            miss_hint,
            clock,
        };
        let mut decision = decide(&input, scratch, cache.as_deref_mut());
        if bumped {
            decision.reasons.insert(0, DecisionReason::GenerationBumped);
        }
        if cache.as_deref().and_then(|c| c.disable_reason()) == Some(CacheDisableReason::LowHitRate)
        {
            decision.reasons.push(DecisionReason::LowHitRateProtection);
        }

        let steps = match (&decision.mode, &decision.plan) {
            (ExecutionMode::Dirty, Some(plan)) => plan.steps(),
            _ => scope_steps,
        };
        let request = ExecRequest {
            steps,
            prune_roots: decision.prune_roots(),
            budget_ms,
            check_interval: config.execution_check_interval(),
            collect_hotspots: config.diagnostics == DiagnosticsLevel::Full,
        };
        let full = config.diagnostics == DiagnosticsLevel::Full;
        let traced = full.then_some(traced_steps);
        let (mut out, state) = if config.allow_in_place_draft && exec.all_out_paths_shallow() {
            let draft = ShallowInPlaceDraft::new(host.take_draft());
            execute(ir, exec, draft, &request, live_dirty, traced, clock)
        } else {
            let draft = CowDraft::new(host.draft().clone());
            execute(ir, exec, draft, &request, live_dirty, traced, clock)
        };

        let outcome = match &out.status {
            ExecStatus::Completed => {
                let patch_count = flush_patches(ir, exec, &out, state, host);
                if patch_count == 0 {
                    ConvergeOutcome::Noop
                } else {
                    ConvergeOutcome::Converged { patch_count }
                }
            }
            ExecStatus::BudgetExceeded => {
                host.set_draft(state);
                if !decision.reasons.contains(&DecisionReason::BudgetCutoff) {
                    decision.reasons.push(DecisionReason::BudgetCutoff);
                }
                tracing::warn!(
                    budget_ms,
                    executed = out.executed,
                    duration_ms = out.duration_ms,
                    "converge degraded: budget exceeded"
                );
                ConvergeOutcome::Degraded {
                    reason: DegradeReason::BudgetExceeded,
                    error: None,
                }
            }
            ExecStatus::Failed { step, error } => {
                host.set_draft(state);
                tracing::warn!(
                    step = step.as_u32(),
                    label = exec.label(*step),
                    error = %error,
                    "converge degraded: step failed"
                );
                ConvergeOutcome::Degraded {
                    reason: DegradeReason::RuntimeError,
                    error: Some(ErrorSummary::from_step_error(error, config.error_message_limit)),
                }
            }
        };

        tracing::debug!(
            requested = ?requested_mode,
            executed = ?decision.mode,
            reasons = ?decision.reasons,
            plan = decision.plan.as_ref().map(|p| p.len()),
            outcome = ?outcome.tag(),
            "converge decision"
        );

        let summary = (config.diagnostics != DiagnosticsLevel::Off).then(|| {
            let roots = decision
                .roots
                .clone()
                .unwrap_or_else(|| resolve_dirty_roots(ir.paths(), &dirty));
            let cache_evidence = cache.as_deref().filter(|_| full).map(|c| match decision.cache_lookup {
                Some(lookup) => c.evidence(lookup.hit, lookup.key_size, lookup.miss_reason),
                None => c.evidence(false, roots.root_count(), miss_hint),
            });
            let executed = out.executed;
            let total = exec.step_count();
            DecisionSummary {
                requested_mode,
                executed_mode: decision.mode,
                outcome: outcome.tag(),
                reasons: decision.reasons.to_vec(),
                step_stats: StepStats {
                    total_steps: total,
                    executed_steps: executed,
                    skipped_steps: total.saturating_sub(executed),
                    changed_steps: out.changes.len(),
                    affected_steps: decision.plan.as_ref().map(|p| p.len()),
                },
                static_ir_digest: ir.digest(),
                execution_budget_ms: budget_ms,
                execution_duration_ms: out.duration_ms,
                decision_budget_ms: input.decision_budget_ms,
                decision_duration_ms: decision.decision_duration_ms,
                dirty: Some(DirtySummary::from_roots(&roots, ir.paths())),
                cache: cache_evidence,
                generation: full.then_some(generation),
                time_slicing: (full && scope != SchedulingScope::All).then(|| TimeSlicingSummary {
                    scope,
                    immediate_steps: exec.topo(SchedulingScope::Immediate).len(),
                    deferred_steps: exec.topo(SchedulingScope::Deferred).len(),
                }),
                top3: core::mem::take(&mut out.hotspots),
                deps_mismatches: core::mem::take(&mut out.deps_mismatches),
            }
        });

        Ok(ConvergeReport {
            outcome,
            mode: decision.mode,
            decision: summary,
        })
    }
}

fn sync_exec<'a>(ir: &StaticIr, exec: &'a mut Option<ExecIr>) -> &'a ExecIr {
    if exec
        .as_ref()
        .is_some_and(|e| e.generation() != ir.generation())
    {
        *exec = None;
    }
    exec.get_or_insert_with(|| {
        tracing::debug!(generation = ir.generation(), steps = ir.len(), "building execution tables");
        ExecIr::build(ir)
    })
}

/// Hands `state` to the host and reports one patch per changed step.
fn flush_patches<H: ConvergeHost + ?Sized>(
    ir: &StaticIr,
    exec: &ExecIr,
    out: &ExecOutput,
    state: Value,
    host: &mut H,
) -> usize {
    let changed: Vec<Value> = out
        .changes
        .iter()
        .map(|change| {
            ir.paths()
                .get(exec.out_path(change.step))
                .and_then(|path| state.get_at(path))
                .cloned()
                .unwrap_or_default()
        })
        .collect();
    host.set_draft(state);

    let mut count = 0;
    for (change, to) in out.changes.iter().zip(&changed) {
        let (Some(entry), Some(path)) = (
            ir.step(change.step),
            ir.paths().get(exec.out_path(change.step)),
        ) else {
            continue;
        };
        host.record_patch(PatchRecord {
            path_id: entry.output,
            path,
            reason: if entry.is_computed() {
                PatchReason::Computed
            } else {
                PatchReason::Link
            },
            from: change.from.as_ref(),
            to,
            step: change.step,
            step_label: &entry.label,
        });
        count += 1;
    }
    count
}
