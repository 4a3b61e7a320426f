// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mode selection for a converge pass.
//!
//! `Auto` requests walk a fixed rule list and stop at the first match:
//!
//! 1. the first transaction runs in full (nothing derived exists yet);
//! 2. an unknown or widened write set runs in full;
//! 3. a clean write set runs an empty dirty plan;
//! 4. when the raw or canonical root count is a large share of the scope, the
//!    pass runs in full without planning;
//! 5. otherwise a plan is fetched or computed under the decision budget. A
//!    cutoff, or a plan covering most of the scope, runs in full.
//!
//! Explicit modes skip the heuristic. `Dirty` still plans, without a budget.

use smallvec::SmallVec;

use crate::cache::{CacheDisableReason, CacheMissReason, PlanCache};
use crate::clock::{BudgetGuard, Clock};
use crate::config::ConvergeConfig;
use crate::context::{ExecutionMode, GenerationEvidence, RequestedMode, SchedulingScope};
use crate::diagnostics::DecisionReason;
use crate::dirty::{DirtyAllReason, DirtyInput, DirtyRootSet, resolve_dirty_roots};
use crate::exec_ir::ExecIr;
use crate::path::{FieldPathId, FieldPathRegistry};
use crate::plan::{ConvergePlan, PlanRequest, compute_plan};
use crate::scratch::PlanScratch;
use crate::step::StepId;

/// Reasons collected for one decision.
pub(crate) type Reasons = SmallVec<[DecisionReason; 4]>;

/// Everything the heuristic reads.
#[derive(Clone, Copy)]
pub(crate) struct DecideInput<'a> {
    pub(crate) exec: &'a ExecIr,
    pub(crate) paths: &'a FieldPathRegistry,
    pub(crate) config: &'a ConvergeConfig,
    pub(crate) txn_seq: u64,
    pub(crate) dirty: DirtyInput<'a>,
    pub(crate) requested: RequestedMode,
    pub(crate) scope: SchedulingScope,
    /// Steps the pass may run, in topological order.
    pub(crate) scope_steps: &'a [StepId],
    /// `scope_steps` came from an explicit subset.
    pub(crate) explicit_subset: bool,
    pub(crate) decision_budget_ms: Option<f64>,
    pub(crate) miss_hint: Option<CacheMissReason>,
    pub(crate) clock: &'a dyn Clock,
}

impl core::fmt::Debug for DecideInput<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecideInput")
            .field("txn_seq", &self.txn_seq)
            .field("dirty", &self.dirty)
            .field("requested", &self.requested)
            .field("scope", &self.scope)
            .field("scope_steps", &self.scope_steps.len())
            .field("explicit_subset", &self.explicit_subset)
            .finish_non_exhaustive()
    }
}

/// Outcome of a cache lookup, kept for evidence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct CacheLookup {
    pub(crate) hit: bool,
    pub(crate) key_size: usize,
    pub(crate) miss_reason: Option<CacheMissReason>,
}

/// What to run.
#[derive(Clone, Debug)]
pub(crate) struct Decision {
    pub(crate) mode: ExecutionMode,
    /// Steps for a dirty pass; `None` runs the whole scope.
    pub(crate) plan: Option<ConvergePlan>,
    /// Canonical roots, when they were resolved.
    pub(crate) roots: Option<DirtyRootSet>,
    pub(crate) reasons: Reasons,
    pub(crate) cache_lookup: Option<CacheLookup>,
    /// Set for `Auto` requests.
    pub(crate) decision_duration_ms: Option<f64>,
}

impl Decision {
    fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            plan: None,
            roots: None,
            reasons: Reasons::new(),
            cache_lookup: None,
            decision_duration_ms: None,
        }
    }

    fn full(reasons: &[DecisionReason]) -> Self {
        let mut d = Self::new(ExecutionMode::Full);
        d.reasons.extend_from_slice(reasons);
        d
    }

    fn known_clean(roots: Option<DirtyRootSet>) -> Self {
        let mut d = Self::new(ExecutionMode::Dirty);
        d.plan = Some(ConvergePlan::default());
        d.roots = roots;
        d.reasons.push(DecisionReason::KnownClean);
        d
    }

    /// The canonical roots a dirty pass prunes with.
    pub(crate) fn prune_roots(&self) -> Option<&[FieldPathId]> {
        match (&self.mode, &self.roots) {
            (ExecutionMode::Dirty, Some(DirtyRootSet::Roots { root_ids, .. })) => Some(root_ids),
            _ => None,
        }
    }
}

/// Aligns `cache` with the graph and applies generation-thrash protection.
///
/// Returns the effective miss hint and whether `GenerationBumped` applies.
pub(crate) fn prepare_cache(
    cache: &mut PlanCache,
    graph_generation: u64,
    evidence: GenerationEvidence,
    hint: Option<CacheMissReason>,
    config: &ConvergeConfig,
) -> (Option<CacheMissReason>, bool) {
    let hint = if cache.sync_generation(graph_generation) {
        Some(CacheMissReason::GenerationBumped)
    } else {
        hint
    };
    let bumped = hint == Some(CacheMissReason::GenerationBumped);
    if bumped && evidence.bump_count >= config.generation_thrash_bumps {
        cache.disable(CacheDisableReason::GenerationThrash);
    }
    (hint, bumped)
}

/// Chooses the mode and plan for a pass.
pub(crate) fn decide(
    input: &DecideInput<'_>,
    scratch: &mut PlanScratch,
    cache: Option<&mut PlanCache>,
) -> Decision {
    let mut decision = match input.requested {
        RequestedMode::Auto => {
            let started = input.clock.now_ms();
            let mut d = decide_auto(input, scratch, cache);
            d.decision_duration_ms = Some((input.clock.now_ms() - started).max(0.0));
            d
        }
        RequestedMode::Full => Decision::full(&[DecisionReason::ExplicitMode]),
        RequestedMode::Dirty => decide_dirty(input, scratch, cache),
    };
    if input.scope != SchedulingScope::All && input.exec.has_deferred() {
        decision.reasons.push(match input.scope {
            SchedulingScope::Deferred => DecisionReason::TimeSlicingDeferred,
            SchedulingScope::All | SchedulingScope::Immediate => {
                DecisionReason::TimeSlicingImmediate
            }
        });
    }
    decision
}

fn ratio(count: usize, scope: usize) -> f64 {
    if scope == 0 {
        1.0
    } else {
        count as f64 / scope as f64
    }
}

fn decide_auto(
    input: &DecideInput<'_>,
    scratch: &mut PlanScratch,
    cache: Option<&mut PlanCache>,
) -> Decision {
    use DecisionReason as R;

    if input.txn_seq == 1 {
        return Decision::full(&[R::ColdStart]);
    }
    let raw_count = match input.dirty {
        DirtyInput::All(_) => return Decision::full(&[R::DirtyAll, R::UnknownWrite]),
        DirtyInput::Paths([]) => return Decision::full(&[R::UnknownWrite]),
        DirtyInput::Clean => return Decision::known_clean(Some(DirtyRootSet::Clean)),
        DirtyInput::Paths(written) => written.len(),
    };

    let scope_count = input.scope_steps.len();
    let threshold = input.config.near_full_root_threshold(scope_count);
    if ratio(raw_count, scope_count) >= threshold {
        return Decision::full(&[R::NearFull]);
    }

    let roots = resolve_dirty_roots(input.paths, &input.dirty);
    let widened = match roots {
        DirtyRootSet::All { .. } => Some(Decision::full(&[R::DirtyAll, R::UnknownWrite])),
        DirtyRootSet::Clean => Some(Decision::known_clean(None)),
        DirtyRootSet::Roots { ref root_ids, .. } => {
            (ratio(root_ids.len(), scope_count) >= threshold).then(|| Decision::full(&[R::NearFull]))
        }
    };
    if let Some(mut d) = widened {
        d.roots = Some(roots);
        return d;
    }

    // Small graphs plan in bounded time; a cutoff there only reflects clock
    // jitter.
    let mut guard = input
        .decision_budget_ms
        .filter(|_| scope_count >= input.config.small_graph_steps)
        .map(|budget| BudgetGuard::start(input.clock, budget, input.config.check_interval));
    let fetched = fetch_plan(input, &roots, scratch, cache, guard.as_mut());

    let mut d = Decision::new(ExecutionMode::Dirty);
    d.cache_lookup = fetched.lookup;
    let Some(plan) = fetched.plan else {
        d.mode = ExecutionMode::Full;
        d.reasons.push(R::BudgetCutoff);
        d.roots = Some(roots);
        return d;
    };
    d.reasons.push(if fetched.hit { R::CacheHit } else { R::CacheMiss });
    if ratio(plan.len(), scope_count) >= input.config.near_full_plan_ratio {
        d.mode = ExecutionMode::Full;
        d.reasons.push(R::NearFull);
    } else {
        d.plan = Some(plan);
    }
    d.roots = Some(roots);
    d
}

fn decide_dirty(
    input: &DecideInput<'_>,
    scratch: &mut PlanScratch,
    cache: Option<&mut PlanCache>,
) -> Decision {
    let mut d = Decision::new(ExecutionMode::Dirty);
    d.reasons.push(DecisionReason::ExplicitMode);
    let roots = resolve_dirty_roots(input.paths, &input.dirty);
    match &roots {
        DirtyRootSet::All { reason } => {
            d.reasons.push(DecisionReason::DirtyAll);
            if *reason == DirtyAllReason::UnknownWrite {
                d.reasons.push(DecisionReason::UnknownWrite);
            }
            d.plan = Some(ConvergePlan::from(input.scope_steps));
        }
        DirtyRootSet::Clean => {
            d.reasons.push(DecisionReason::KnownClean);
            d.plan = Some(ConvergePlan::default());
        }
        DirtyRootSet::Roots { .. } => {
            let fetched = fetch_plan(input, &roots, scratch, cache, None);
            if let Some(lookup) = fetched.lookup {
                d.reasons.push(if lookup.hit {
                    DecisionReason::CacheHit
                } else {
                    DecisionReason::CacheMiss
                });
            }
            d.cache_lookup = fetched.lookup;
            // Without a guard planning always finishes.
            d.plan = Some(fetched.plan.unwrap_or_else(|| ConvergePlan::from(input.scope_steps)));
        }
    }
    d.roots = Some(roots);
    d
}

struct Fetched {
    plan: Option<ConvergePlan>,
    hit: bool,
    lookup: Option<CacheLookup>,
}

/// Serves the plan for `roots` from `cache` or computes (and caches) it.
fn fetch_plan(
    input: &DecideInput<'_>,
    roots: &DirtyRootSet,
    scratch: &mut PlanScratch,
    cache: Option<&mut PlanCache>,
    guard: Option<&mut BudgetGuard<'_>>,
) -> Fetched {
    let root_ids = roots.root_ids();
    let config = input.config;
    let mut cache = cache.filter(|c| !c.is_disabled());
    let cacheable = cache.is_some()
        && !input.explicit_subset
        && root_ids.len() <= config.max_cacheable_root_ids
        && ratio(root_ids.len(), input.scope_steps.len()) <= config.max_cacheable_root_ratio;
    let key = roots.key_hash().unwrap_or_default() ^ input.scope.key_flag();

    let mut lookup = None;
    if let Some(cache) = cache.as_deref_mut().filter(|_| cacheable) {
        if let Some(plan) = cache.get(key, root_ids) {
            return Fetched {
                plan: Some(plan),
                hit: true,
                lookup: Some(CacheLookup {
                    hit: true,
                    key_size: root_ids.len(),
                    miss_reason: None,
                }),
            };
        }
        lookup = Some(CacheLookup {
            hit: false,
            key_size: root_ids.len(),
            miss_reason: Some(input.miss_hint.unwrap_or(CacheMissReason::NotCached)),
        });
    }

    let request = PlanRequest {
        roots: root_ids,
        scope: input.scope,
        scope_steps: input.scope_steps,
        force_scan: input.explicit_subset,
        small_graph_steps: config.small_graph_steps,
    };
    let plan = compute_plan(input.exec, scratch, &request, guard);
    if let (Some(plan), Some(cache), true) = (&plan, cache, cacheable) {
        cache.insert(key, root_ids, plan.clone());
    }
    Fetched {
        plan,
        hit: false,
        lookup,
    }
}
