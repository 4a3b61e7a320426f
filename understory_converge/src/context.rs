// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-call inputs of a converge pass.

use serde::{Deserialize, Serialize};

use crate::cache::{CacheMissReason, PlanCache};
use crate::clock::Clock;
use crate::dirty::DirtyInput;
use crate::step::StepId;

/// The mode a caller asks for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedMode {
    /// Let the engine decide.
    #[default]
    Auto,
    /// Run every step in scope.
    Full,
    /// Run only the affected steps.
    Dirty,
}

/// The mode a pass ran in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every step in scope ran.
    Full,
    /// Only planned steps ran.
    Dirty,
}

/// Which steps a pass may run under time slicing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingScope {
    /// Every step.
    #[default]
    All,
    /// Immediate steps only.
    Immediate,
    /// Deferred steps only.
    Deferred,
}

impl SchedulingScope {
    /// Value mixed into plan cache keys so scopes never share entries.
    #[must_use]
    pub(crate) fn key_flag(self) -> u64 {
        match self {
            Self::All => 0,
            Self::Immediate => 1,
            Self::Deferred => 2,
        }
    }
}

/// How often the graph generation has moved, as observed by the host.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationEvidence {
    /// Current generation.
    pub generation: u64,
    /// Recent generation bumps.
    pub bump_count: u32,
}

/// Everything a single converge call needs besides the host.
///
/// Built with chained setters from [`ConvergeContext::new`]:
///
/// ```rust
/// use understory_converge::{ConvergeContext, DirtyInput, DirtyPath, ManualClock, RequestedMode};
///
/// let clock = ManualClock::new(0.0);
/// let written = [DirtyPath::Dotted("x")];
/// let ctx = ConvergeContext::new(&clock)
///     .txn_seq(2)
///     .dirty(DirtyInput::Paths(&written))
///     .requested_mode(RequestedMode::Dirty)
///     .budget_ms(4.0);
/// assert_eq!(ctx.budget_ms, 4.0);
/// ```
pub struct ConvergeContext<'a> {
    /// Transaction sequence number; `1` is the first transaction.
    pub txn_seq: u64,
    /// What the transaction wrote.
    pub dirty: DirtyInput<'a>,
    /// Requested mode.
    pub requested_mode: RequestedMode,
    /// Time-slicing scope.
    pub scope: SchedulingScope,
    /// Explicit step subset; runs in topological order regardless of the
    /// order given. Plans for subsets are never cached.
    pub scope_step_ids: Option<&'a [StepId]>,
    /// Execution budget in milliseconds.
    pub budget_ms: f64,
    /// Budget for the auto decision (planning included). Zero, negative and
    /// non-finite budgets are ignored.
    pub decision_budget_ms: Option<f64>,
    /// Plan cache, owned by the host across calls.
    pub plan_cache: Option<&'a mut PlanCache>,
    /// Generation evidence from the host.
    pub generation: GenerationEvidence,
    /// Why the host expects a cache miss, if it does.
    pub cache_miss_hint: Option<CacheMissReason>,
    /// Time source.
    pub clock: &'a dyn Clock,
}

impl core::fmt::Debug for ConvergeContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConvergeContext")
            .field("txn_seq", &self.txn_seq)
            .field("dirty", &self.dirty)
            .field("requested_mode", &self.requested_mode)
            .field("scope", &self.scope)
            .field("scope_step_ids", &self.scope_step_ids)
            .field("budget_ms", &self.budget_ms)
            .field("decision_budget_ms", &self.decision_budget_ms)
            .field("plan_cache", &self.plan_cache.as_ref().map(|c| c.len()))
            .field("generation", &self.generation)
            .field("cache_miss_hint", &self.cache_miss_hint)
            .finish_non_exhaustive()
    }
}

impl<'a> ConvergeContext<'a> {
    /// A context for transaction 1 with an unknown write set, auto mode, no
    /// cache, and an unlimited budget.
    #[must_use]
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self {
            txn_seq: 1,
            dirty: DirtyInput::Paths(&[]),
            requested_mode: RequestedMode::Auto,
            scope: SchedulingScope::All,
            scope_step_ids: None,
            budget_ms: f64::INFINITY,
            decision_budget_ms: None,
            plan_cache: None,
            generation: GenerationEvidence::default(),
            cache_miss_hint: None,
            clock,
        }
    }

    /// Sets the transaction sequence number.
    #[must_use]
    pub fn txn_seq(mut self, txn_seq: u64) -> Self {
        self.txn_seq = txn_seq;
        self
    }

    /// Sets the dirty input.
    #[must_use]
    pub fn dirty(mut self, dirty: DirtyInput<'a>) -> Self {
        self.dirty = dirty;
        self
    }

    /// Sets the requested mode.
    #[must_use]
    pub fn requested_mode(mut self, mode: RequestedMode) -> Self {
        self.requested_mode = mode;
        self
    }

    /// Sets the scheduling scope.
    #[must_use]
    pub fn scope(mut self, scope: SchedulingScope) -> Self {
        self.scope = scope;
        self
    }

    /// Restricts the pass to an explicit step subset.
    #[must_use]
    pub fn scope_step_ids(mut self, steps: &'a [StepId]) -> Self {
        self.scope_step_ids = Some(steps);
        self
    }

    /// Sets the execution budget.
    #[must_use]
    pub fn budget_ms(mut self, budget_ms: f64) -> Self {
        self.budget_ms = budget_ms;
        self
    }

    /// Sets the decision budget.
    #[must_use]
    pub fn decision_budget_ms(mut self, budget_ms: f64) -> Self {
        self.decision_budget_ms = Some(budget_ms);
        self
    }

    /// Attaches a plan cache.
    #[must_use]
    pub fn plan_cache(mut self, cache: &'a mut PlanCache) -> Self {
        self.plan_cache = Some(cache);
        self
    }

    /// Sets the generation evidence.
    #[must_use]
    pub fn generation(mut self, generation: GenerationEvidence) -> Self {
        self.generation = generation;
        self
    }

    /// Sets the expected miss reason.
    #[must_use]
    pub fn cache_miss_hint(mut self, hint: CacheMissReason) -> Self {
        self.cache_miss_hint = Some(hint);
        self
    }
}
