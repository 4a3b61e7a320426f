// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Serializable evidence about converge passes.
//!
//! Nothing here feeds back into control flow: a [`DecisionSummary`] only
//! records why the engine chose a mode and what the pass did.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::cache::PlanCacheEvidence;
use crate::context::{ExecutionMode, GenerationEvidence, RequestedMode, SchedulingScope};
use crate::dirty::{DirtyAllReason, DirtyRootSet};
use crate::error::StepError;
use crate::path::FieldPathRegistry;
use crate::reads::DepsDiff;

/// Root paths kept in a [`DirtySummary`].
const DIRTY_SUMMARY_PATHS: usize = 16;

/// Why a pass ran the way it did. A decision usually carries several.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// First transaction: nothing derived exists yet.
    ColdStart,
    /// The dirty set was widened to everything.
    DirtyAll,
    /// The write set was unknown.
    UnknownWrite,
    /// Enough of the graph was affected that a full pass is cheaper.
    NearFull,
    /// The plan came from the cache.
    CacheHit,
    /// The plan was computed.
    CacheMiss,
    /// A time budget ran out.
    BudgetCutoff,
    /// The caller forced the mode.
    ExplicitMode,
    /// The graph generation changed since the cache last saw it.
    GenerationBumped,
    /// The cache disabled itself after too many misses.
    LowHitRateProtection,
    /// The pass covered only immediate steps.
    TimeSlicingImmediate,
    /// The pass covered only deferred steps.
    TimeSlicingDeferred,
    /// Nothing observable was written.
    KnownClean,
}

/// Terminal state of a pass, for summaries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeTag {
    /// At least one field changed.
    Converged,
    /// Nothing changed.
    Noop,
    /// Rolled back.
    Degraded,
}

/// Step counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    /// Steps in the graph.
    pub total_steps: usize,
    /// Steps whose writer ran.
    pub executed_steps: usize,
    /// `total_steps - executed_steps`.
    pub skipped_steps: usize,
    /// Steps whose output changed.
    pub changed_steps: usize,
    /// Plan length, when a plan was computed or fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_steps: Option<usize>,
}

/// One of the slowest steps of a pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    /// Step id.
    pub step: u32,
    /// Step label.
    pub label: String,
    /// Wall time spent in the writer.
    pub duration_ms: f64,
    /// Whether the output changed.
    pub changed: bool,
}

/// A computed step whose traced reads disagree with its declared deps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepsMismatch {
    /// Step id.
    pub step: u32,
    /// Step label.
    pub label: String,
    /// What differs.
    pub diff: DepsDiff,
}

/// Keeps `hotspots` as the `k` slowest entries, slowest first.
pub(crate) fn insert_hotspot(hotspots: &mut Vec<Hotspot>, k: usize, next: Hotspot) {
    if k == 0 {
        return;
    }
    let at = hotspots
        .iter()
        .position(|h| next.duration_ms > h.duration_ms)
        .unwrap_or(hotspots.len());
    if at < k {
        hotspots.insert(at, next);
        hotspots.truncate(k);
    }
}

/// What the dirty set looked like.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtySummary {
    /// The set was widened to everything.
    pub dirty_all: bool,
    /// Why, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DirtyAllReason>,
    /// Number of canonical roots.
    pub root_count: usize,
    /// The first few roots as dotted paths.
    pub root_paths: Vec<String>,
}

impl DirtySummary {
    /// Summarizes `set`, naming roots through `paths`.
    #[must_use]
    pub fn from_roots(set: &DirtyRootSet, paths: &FieldPathRegistry) -> Self {
        let root_paths = set
            .root_ids()
            .iter()
            .take(DIRTY_SUMMARY_PATHS)
            .filter_map(|&id| paths.get(id))
            .map(ToString::to_string)
            .collect();
        Self {
            dirty_all: matches!(set, DirtyRootSet::All { .. }),
            reason: set.all_reason(),
            root_count: set.root_count(),
            root_paths,
        }
    }
}

/// Scope of a time-sliced pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlicingSummary {
    /// The pass scope.
    pub scope: SchedulingScope,
    /// Immediate steps in the graph.
    pub immediate_steps: usize,
    /// Deferred steps in the graph.
    pub deferred_steps: usize,
}

/// Marker for an error summary that lost information.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDowngrade {
    /// The message was shortened.
    Truncated,
}

/// Serializable form of a writer failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Error class name.
    pub name: String,
    /// Message, at most the configured number of characters.
    pub message: String,
    /// Set when the message was shortened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade: Option<ErrorDowngrade>,
}

impl ErrorSummary {
    /// Summarizes `err`, keeping at most `limit` characters of its message.
    #[must_use]
    pub fn from_step_error(err: &StepError, limit: usize) -> Self {
        let (message, downgrade) = match err.message.char_indices().nth(limit) {
            Some((cut, _)) => (
                String::from(&err.message[..cut]),
                Some(ErrorDowngrade::Truncated),
            ),
            None => (err.message.clone(), None),
        };
        Self {
            name: String::from(&*err.name),
            message,
            downgrade,
        }
    }
}

/// Evidence about one converge pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    /// What the caller asked for.
    pub requested_mode: RequestedMode,
    /// What ran.
    pub executed_mode: ExecutionMode,
    /// How it ended.
    pub outcome: OutcomeTag,
    /// Why, in the order the reasons were found.
    pub reasons: Vec<DecisionReason>,
    /// Step counters.
    pub step_stats: StepStats,
    /// Digest of the compiled graph.
    pub static_ir_digest: u64,
    /// Execution budget.
    pub execution_budget_ms: f64,
    /// Time spent executing.
    pub execution_duration_ms: f64,
    /// Decision budget, for auto passes that had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_budget_ms: Option<f64>,
    /// Time spent deciding, for auto passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_duration_ms: Option<f64>,
    /// Dirty set summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirty: Option<DirtySummary>,
    /// Cache snapshot (full diagnostics only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<PlanCacheEvidence>,
    /// Generation evidence (full diagnostics only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationEvidence>,
    /// Time-slicing scope (full diagnostics only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_slicing: Option<TimeSlicingSummary>,
    /// Slowest steps (full diagnostics only).
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub top3: Vec<Hotspot>,
    /// Dependency mismatches found by tracing (full diagnostics only). Each
    /// step is traced once per program.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub deps_mismatches: Vec<DepsMismatch>,
}

impl DecisionSummary {
    /// Returns `true` if `reason` was recorded.
    #[must_use]
    pub fn has_reason(&self, reason: DecisionReason) -> bool {
        self.reasons.contains(&reason)
    }
}
