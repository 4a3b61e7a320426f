// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Converge: incremental recomputation of derived fields.
//!
//! An application keeps its state in a [`Value`] tree. Some fields are
//! *derived*: a computed field is a pure function of other fields, and a link
//! field mirrors another field. After a transaction writes to the tree, a
//! converge pass brings every derived field up to date, running only the steps
//! the write can affect.
//!
//! The pieces:
//!
//! - **Graph** ([`GraphBuilder`], [`StaticIr`]): step declarations over
//!   interned [`FieldPath`]s, compiled into a deterministic topological order.
//!   Cycles and multiple writers are [`ConfigError`]s.
//! - **Execution tables** ([`ExecIr`]): flat, offset-encoded arrays rebuilt
//!   lazily per graph generation.
//! - **Dirty roots** ([`resolve_dirty_roots`], [`DirtyRootSet`]): the written
//!   paths, canonicalized into a sorted, prefix-free id set with a hash key.
//! - **Decision**: `Auto` passes choose between running every step (`Full`)
//!   and running a computed plan (`Dirty`), recording their reasons in a
//!   serializable [`DecisionSummary`].
//! - **Plans** ([`ConvergePlan`], [`PlanCache`]): affected steps in topological
//!   order, cached by root set.
//! - **Drafts** ([`CowDraft`], [`ShallowInPlaceDraft`]): staged writes with
//!   all-or-nothing rollback. A pass that fails or runs over budget leaves the
//!   host state untouched.
//! - **Dependency tracing** ([`StateReader`], [`DepsDiff`]): under full
//!   diagnostics, each computed step's reads are checked once against its
//!   declared dependencies.
//! - **Refresh guard** ([`SourceRefresh`]): stale-result protection for
//!   asynchronously fetched fields.
//!
//! ## Quick Start
//!
//! ```rust
//! use understory_converge::{
//!     ConvergeContext, ConvergeOutcome, ConvergeProgram, DirtyInput, DirtyPath, FieldPath,
//!     GraphBuilder, ManualClock, RecordingHost, RequestedMode, Value,
//! };
//!
//! let mut graph = GraphBuilder::new();
//! graph
//!     .computed("b", &["a"], |s| {
//!         Ok(Value::from(s.get("a").and_then(Value::as_f64).unwrap_or(0.0) + 1.0))
//!     })
//!     .unwrap();
//! graph.link("c", "b").unwrap();
//! let mut program = ConvergeProgram::new(graph.build(1));
//!
//! let clock = ManualClock::new(0.0);
//! let mut host = RecordingHost::new(Value::object([("a", Value::from(1))]));
//!
//! // The first transaction runs every step.
//! program.converge(ConvergeContext::new(&clock), &mut host).unwrap();
//! assert_eq!(host.state().get("c"), Some(&Value::from(2)));
//!
//! // Later transactions say what they wrote.
//! let mut next = host.state().clone();
//! next.set_at(&FieldPath::parse("a").unwrap(), Value::from(10)).unwrap();
//! host.write(next);
//! let written = [DirtyPath::Dotted("a")];
//! let ctx = ConvergeContext::new(&clock)
//!     .txn_seq(2)
//!     .dirty(DirtyInput::Paths(&written))
//!     .requested_mode(RequestedMode::Dirty);
//! let report = program.converge(ctx, &mut host).unwrap();
//! assert_eq!(report.outcome, ConvergeOutcome::Converged { patch_count: 2 });
//! assert_eq!(host.state().get("c"), Some(&Value::from(11)));
//! ```
//!
//! ## Budgets
//!
//! Every pass has an execution budget, and `Auto` passes may have a decision
//! budget. Both are checked against a caller-supplied [`Clock`] every
//! [`ConvergeConfig::check_interval`] iterations. Running out of execution
//! budget rolls the pass back and reports
//! [`ConvergeOutcome::Degraded`]; running out of decision budget falls back to
//! a full pass. A decision budget only applies when it is finite and positive,
//! and never on graphs below [`ConvergeConfig::small_graph_steps`].
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events: `error` when a call is refused for an
//! invalid graph, `warn` for degraded passes and dependency mismatches, `debug`
//! for decisions, table
//! rebuilds and cache shutdowns, and `trace` per step under full diagnostics.
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` and uses `alloc`.
//!
//! ## Features
//!
//! - `std` (default): enables [`SystemClock`] and the `std` features of the
//!   dependencies.

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod bitset;
mod cache;
mod clock;
mod config;
mod context;
mod decide;
mod diagnostics;
mod dirty;
mod draft;
mod error;
mod exec_ir;
mod executor;
mod fnv;
mod host;
mod path;
mod plan;
mod program;
mod reads;
mod refresh;
mod scratch;
mod static_ir;
mod step;
mod value;

pub use cache::{CacheDisableReason, CacheMissReason, PlanCache, PlanCacheEvidence};
#[cfg(feature = "std")]
pub use clock::SystemClock;
pub use clock::{Clock, ManualClock};
pub use config::{ConvergeConfig, DiagnosticsLevel, LowHitRatePolicy, NearFullTier};
pub use context::{
    ConvergeContext, ExecutionMode, GenerationEvidence, RequestedMode, SchedulingScope,
};
pub use diagnostics::{
    DecisionReason, DecisionSummary, DepsMismatch, DirtySummary, ErrorDowngrade, ErrorSummary,
    Hotspot, OutcomeTag, StepStats, TimeSlicingSummary,
};
pub use dirty::{
    DirtyAllReason, DirtyInput, DirtyPath, DirtyRootSet, resolve_dirty_roots, root_key_hash,
};
pub use draft::{CowDraft, Draft, ShallowInPlaceDraft};
pub use error::{ConfigError, DraftError, StepError};
pub use exec_ir::ExecIr;
pub use host::{ConvergeHost, OwnedPatch, PatchReason, PatchRecord, RecordingHost};
pub use path::{FieldPath, FieldPathId, FieldPathRegistry};
pub use plan::ConvergePlan;
pub use program::{ConvergeOutcome, ConvergeProgram, ConvergeReport, DegradeReason};
pub use reads::{DepsDiff, StateReader};
pub use refresh::{RefreshCompletion, RefreshPolicy, RefreshTicket, SourceRefresh};
pub use scratch::PlanScratch;
pub use static_ir::{GraphBuilder, StaticIr};
pub use step::{DeriveFn, EqualsFn, Scheduling, StepEntry, StepId, StepKind};
pub use value::{Object, Value};
