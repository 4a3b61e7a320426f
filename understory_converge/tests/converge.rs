// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end converge behavior.

use std::rc::Rc;

use proptest::collection::vec;
use proptest::prelude::*;
use proptest::sample::Index;

use understory_converge::{
    ConvergeConfig, ConvergeContext, ConvergeOutcome, ConvergeProgram, DecisionReason,
    DegradeReason, DiagnosticsLevel, DirtyInput, DirtyPath, ExecutionMode, FieldPath,
    GraphBuilder, ManualClock, PlanCache, RecordingHost, RequestedMode, SchedulingScope,
    StateReader, StaticIr, StepError, Value, resolve_dirty_roots,
};

fn number(state: &StateReader<'_>, path: &FieldPath) -> f64 {
    state.get_at(path).and_then(Value::as_f64).unwrap_or(0.0)
}

fn path(s: &str) -> FieldPath {
    FieldPath::parse(s).unwrap()
}

fn written<'a>(names: &'a [&'a str]) -> Vec<DirtyPath<'a>> {
    names.iter().map(|n| DirtyPath::Dotted(n)).collect()
}

/// `a = in + 1`, `b = a * 2`, `c = b - 1`, plus an unrelated `side = other`.
fn chain() -> StaticIr {
    let mut g = GraphBuilder::new();
    g.computed("a", &["in"], |s| Ok(Value::from(number(s, &path("in")) + 1.0)))
        .unwrap();
    g.computed("b", &["a"], |s| Ok(Value::from(number(s, &path("a")) * 2.0)))
        .unwrap();
    g.computed("c", &["b"], |s| Ok(Value::from(number(s, &path("b")) - 1.0)))
        .unwrap();
    g.link("side", "other").unwrap();
    g.build(1)
}

#[test]
fn double_and_label() {
    let mut g = GraphBuilder::new();
    g.computed("double", &["x"], |s| {
        Ok(Value::from(number(s, &path("x")) * 2.0))
    })
    .unwrap();
    g.computed("label", &["double"], |s| {
        let double = s.get("double").cloned().unwrap_or_default();
        Ok(Value::from(format!("v:{double}")))
    })
    .unwrap();
    let mut program = ConvergeProgram::new(g.build(1));

    let clock = ManualClock::new(0.0);
    let mut host = RecordingHost::new(Value::object([
        ("x", Value::from(1)),
        ("double", Value::from(0)),
        ("label", Value::from("")),
    ]));
    let dirty = written(&["x"]);
    let ctx = ConvergeContext::new(&clock)
        .txn_seq(2)
        .dirty(DirtyInput::Paths(&dirty));
    let report = program.converge(ctx, &mut host).unwrap();

    assert_eq!(report.outcome, ConvergeOutcome::Converged { patch_count: 2 });
    assert_eq!(
        host.state(),
        &Value::object([
            ("x", Value::from(1)),
            ("double", Value::from(2)),
            ("label", Value::from("v:2")),
        ])
    );
    let patches = host.patches();
    assert_eq!(patches[0].from, Some(Value::from(0)));
    assert_eq!(patches[1].to, Value::from("v:2"));
}

#[test]
fn chains_propagate_in_one_pass() {
    let mut program = ConvergeProgram::new(chain());
    let clock = ManualClock::new(0.0);
    let mut host = RecordingHost::new(Value::object([("in", Value::from(1))]));
    program.converge(ConvergeContext::new(&clock), &mut host).unwrap();
    assert_eq!(host.state().get("c"), Some(&Value::from(3)));
    host.take_patches();

    let mut next = host.state().clone();
    next.set_at(&path("in"), Value::from(5)).unwrap();
    host.write(next);
    let dirty = written(&["in"]);
    let ctx = ConvergeContext::new(&clock)
        .txn_seq(2)
        .dirty(DirtyInput::Paths(&dirty))
        .requested_mode(RequestedMode::Dirty);
    let report = program.converge(ctx, &mut host).unwrap();

    assert_eq!(report.mode, ExecutionMode::Dirty);
    assert_eq!(report.outcome, ConvergeOutcome::Converged { patch_count: 3 });
    assert_eq!(host.state().get("a"), Some(&Value::from(6)));
    assert_eq!(host.state().get("b"), Some(&Value::from(12)));
    assert_eq!(host.state().get("c"), Some(&Value::from(11)));
    let stats = report.decision.unwrap().step_stats;
    assert_eq!((stats.executed_steps, stats.skipped_steps), (3, 1));
}

#[test]
fn converging_twice_is_a_noop() {
    let mut program = ConvergeProgram::new(chain());
    let clock = ManualClock::new(0.0);
    let mut host = RecordingHost::new(Value::object([
        ("in", Value::from(1)),
        ("other", Value::from("o")),
    ]));
    let first = program.converge(ConvergeContext::new(&clock), &mut host).unwrap();
    assert_eq!(first.outcome, ConvergeOutcome::Converged { patch_count: 4 });

    let again = ConvergeContext::new(&clock)
        .txn_seq(2)
        .requested_mode(RequestedMode::Full);
    let report = program.converge(again, &mut host).unwrap();
    assert_eq!(report.outcome, ConvergeOutcome::Noop);

    let clean = ConvergeContext::new(&clock)
        .txn_seq(3)
        .dirty(DirtyInput::Clean);
    let report = program.converge(clean, &mut host).unwrap();
    assert_eq!(report.outcome, ConvergeOutcome::Noop);
    assert!(report.decision.unwrap().has_reason(DecisionReason::KnownClean));
    assert_eq!(host.patches().len(), 4);
}

/// Twelve steps, so a single root stays under the cacheable root ratio.
fn wide() -> StaticIr {
    let mut g = GraphBuilder::new();
    for i in 0..12_i32 {
        let input = format!("in{}", i % 3);
        let dep = path(&input);
        g.computed(&format!("out{i}"), &[input.as_str()], move |s| {
            Ok(Value::from(number(s, &dep) * 10.0 + f64::from(i)))
        })
        .unwrap();
    }
    g.build(1)
}

fn wide_state(seed: i32) -> Value {
    Value::object([
        ("in0", Value::from(seed)),
        ("in1", Value::from(seed + 1)),
        ("in2", Value::from(seed + 2)),
    ])
}

#[test]
fn plans_are_deterministic_and_cached_plans_match() {
    let clock = ManualClock::new(0.0);
    let dirty = written(&["in1"]);
    let mut caches = [PlanCache::new(16), PlanCache::new(16)];
    for cache in &mut caches {
        let mut program = ConvergeProgram::new(wide());
        let mut host = RecordingHost::new(wide_state(0));
        let ctx = ConvergeContext::new(&clock)
            .txn_seq(2)
            .dirty(DirtyInput::Paths(&dirty))
            .requested_mode(RequestedMode::Dirty)
            .plan_cache(cache);
        program.converge(ctx, &mut host).unwrap();
    }

    let ir = wide();
    let roots = resolve_dirty_roots(ir.paths(), &DirtyInput::Paths(&dirty));
    let key = roots.key_hash().unwrap();
    let [first, second] = &mut caches;
    let a = first.get(key, roots.root_ids()).unwrap();
    let b = second.get(key, roots.root_ids()).unwrap();
    assert_eq!(a, b);
    // out1, out4, out7, out10 read in1.
    assert_eq!(a.len(), 4);
}

#[test]
fn cache_hits_converge_like_fresh_plans() {
    let clock = ManualClock::new(0.0);
    let dirty = written(&["in2"]);
    let mut cache = PlanCache::new(16);
    let mut cached = ConvergeProgram::with_config(
        wide(),
        ConvergeConfig {
            diagnostics: DiagnosticsLevel::Full,
            ..ConvergeConfig::default()
        },
    );
    let mut host = RecordingHost::new(wide_state(0));
    cached
        .converge(ConvergeContext::new(&clock), &mut host)
        .unwrap();

    for (txn, seed) in [(2, 5), (3, 9)] {
        let mut next = host.state().clone();
        next.set_at(&path("in2"), Value::from(seed)).unwrap();
        host.write(next.clone());
        let ctx = ConvergeContext::new(&clock)
            .txn_seq(txn)
            .dirty(DirtyInput::Paths(&dirty))
            .plan_cache(&mut cache);
        let report = cached.converge(ctx, &mut host).unwrap();
        let summary = report.decision.unwrap();
        let expected = if txn == 2 {
            DecisionReason::CacheMiss
        } else {
            DecisionReason::CacheHit
        };
        assert!(summary.has_reason(expected), "{:?}", summary.reasons);
        assert_eq!(summary.cache.unwrap().hit, txn == 3);

        let mut fresh = ConvergeProgram::new(wide());
        let mut reference = RecordingHost::new(next);
        let ctx = ConvergeContext::new(&clock)
            .txn_seq(txn)
            .requested_mode(RequestedMode::Full);
        fresh.converge(ctx, &mut reference).unwrap();
        assert_eq!(host.state(), reference.state());
    }
    assert_eq!((cache.hits(), cache.misses()), (1, 1));
}

#[test]
fn failures_roll_back_every_earlier_write() {
    for allow_in_place_draft in [true, false] {
        let mut g = GraphBuilder::new();
        for i in 0..10_i32 {
            let input = if i == 0 { "in".to_string() } else { format!("s{}", i - 1) };
            let dep = path(&input);
            g.computed(&format!("s{i}"), &[input.as_str()], move |s| {
                let v = number(s, &dep);
                if i == 6 && v > 100.0 {
                    return Err(StepError::named("RangeError", format!("s{i} overflow")));
                }
                Ok(Value::from(v + 1.0))
            })
            .unwrap();
        }
        let mut program = ConvergeProgram::with_config(
            g.build(1),
            ConvergeConfig {
                allow_in_place_draft,
                ..ConvergeConfig::default()
            },
        );
        let clock = ManualClock::new(0.0);
        let base = Value::object([("in", Value::from(200))]);
        let mut host = RecordingHost::new(base.clone());
        let report = program.converge(ConvergeContext::new(&clock), &mut host).unwrap();

        let ConvergeOutcome::Degraded { reason, error } = report.outcome else {
            panic!("expected a degraded outcome, got {:?}", report.outcome);
        };
        assert_eq!(reason, DegradeReason::RuntimeError);
        let error = error.unwrap();
        assert_eq!((error.name.as_str(), error.message.as_str()), ("RangeError", "s6 overflow"));
        assert_eq!(host.state(), &base, "in place: {allow_in_place_draft}");
        assert!(host.patches().is_empty());
    }
}

#[test]
fn slow_writers_exceed_the_budget() {
    let clock = Rc::new(ManualClock::new(0.0));
    let mut g = GraphBuilder::new();
    for i in 0..1000_i32 {
        let clock = Rc::clone(&clock);
        g.computed(&format!("f{i}"), &["x"], move |s| {
            if i == 5 {
                clock.advance(5.0);
            }
            Ok(Value::from(number(s, &path("x")) + f64::from(i)))
        })
        .unwrap();
    }
    let mut program = ConvergeProgram::new(g.build(1));
    let base = Value::object([("x", Value::from(1))]);
    let mut host = RecordingHost::new(base.clone());
    let ctx = ConvergeContext::new(&*clock)
        .requested_mode(RequestedMode::Full)
        .budget_ms(1.0);
    let report = program.converge(ctx, &mut host).unwrap();

    assert_eq!(
        report.outcome,
        ConvergeOutcome::Degraded {
            reason: DegradeReason::BudgetExceeded,
            error: None
        }
    );
    assert_eq!(host.state(), &base);
    assert!(host.patches().is_empty());
    let summary = report.decision.unwrap();
    assert!(summary.has_reason(DecisionReason::BudgetCutoff));
    // Checked every 32 steps by default.
    assert_eq!(summary.step_stats.executed_steps, 31);
}

#[test]
fn summaries_serialize() {
    let mut program = ConvergeProgram::new(chain());
    let clock = ManualClock::new(0.0);
    let mut host = RecordingHost::new(Value::object([("in", Value::from(1))]));
    let report = program.converge(ConvergeContext::new(&clock), &mut host).unwrap();
    let json = serde_json::to_value(report.decision.unwrap()).unwrap();
    assert_eq!(json["requested_mode"], "auto");
    assert_eq!(json["executed_mode"], "full");
    assert_eq!(json["reasons"][0], "cold_start");
    assert_eq!(json["outcome"], "converged");
    assert_eq!(json["step_stats"]["changed_steps"], 3);
    assert!(json.get("cache").is_none());
}

#[test]
fn failed_passes_restore_a_null_root() {
    for allow_in_place_draft in [true, false] {
        let mut g = GraphBuilder::new();
        g.computed("a", &["x"], |s| Ok(Value::from(number(s, &path("x")) + 1.0)))
            .unwrap();
        g.computed("b", &["a"], |_| Err(StepError::new("b is broken")))
            .unwrap();
        let mut program = ConvergeProgram::with_config(
            g.build(1),
            ConvergeConfig {
                allow_in_place_draft,
                ..ConvergeConfig::default()
            },
        );
        let clock = ManualClock::new(0.0);
        let mut host = RecordingHost::default();
        let report = program.converge(ConvergeContext::new(&clock), &mut host).unwrap();

        assert!(report.outcome.is_degraded(), "{:?}", report.outcome);
        assert_eq!(host.state(), &Value::Null, "in place: {allow_in_place_draft}");
        assert!(host.patches().is_empty());
    }
}

/// `fast = x + 1` runs immediately; `slow = x * 100` is deferred.
fn sliced() -> StaticIr {
    let mut g = GraphBuilder::new();
    g.computed("fast", &["x"], |s| Ok(Value::from(number(s, &path("x")) + 1.0)))
        .unwrap();
    let slow = g
        .computed("slow", &["x"], |s| {
            Ok(Value::from(number(s, &path("x")) * 100.0))
        })
        .unwrap();
    g.deferred(slow);
    g.build(1)
}

#[test]
fn immediate_passes_leave_deferred_fields_for_later() {
    let mut program = ConvergeProgram::new(sliced());
    let clock = ManualClock::new(0.0);
    let mut host = RecordingHost::new(Value::object([("x", Value::from(1))]));
    let cold = ConvergeContext::new(&clock).scope(SchedulingScope::Immediate);
    let report = program.converge(cold, &mut host).unwrap();
    assert_eq!(report.outcome, ConvergeOutcome::Converged { patch_count: 1 });
    assert_eq!(host.state().get("fast"), Some(&Value::from(2)));
    assert_eq!(host.state().get("slow"), None);

    let mut next = host.state().clone();
    next.set_at(&path("x"), Value::from(3)).unwrap();
    host.write(next);
    let dirty = written(&["x"]);
    let immediate = ConvergeContext::new(&clock)
        .txn_seq(2)
        .dirty(DirtyInput::Paths(&dirty))
        .scope(SchedulingScope::Immediate);
    let report = program.converge(immediate, &mut host).unwrap();
    assert!(report.decision.unwrap().has_reason(DecisionReason::TimeSlicingImmediate));
    assert_eq!(host.state().get("fast"), Some(&Value::from(4)));
    assert_eq!(host.state().get("slow"), None);

    let deferred = ConvergeContext::new(&clock)
        .txn_seq(3)
        .dirty(DirtyInput::Paths(&dirty))
        .scope(SchedulingScope::Deferred);
    let report = program.converge(deferred, &mut host).unwrap();
    assert_eq!(report.outcome, ConvergeOutcome::Converged { patch_count: 1 });
    assert!(report.decision.unwrap().has_reason(DecisionReason::TimeSlicingDeferred));
    assert_eq!(host.state().get("fast"), Some(&Value::from(4)));
    assert_eq!(host.state().get("slow"), Some(&Value::from(300)));
}

/// `out{i} = in{i % 3} * 10 + i`, with odd steps deferred.
fn wide_sliced() -> StaticIr {
    let mut g = GraphBuilder::new();
    for i in 0..12_i32 {
        let input = format!("in{}", i % 3);
        let dep = path(&input);
        let step = g
            .computed(&format!("out{i}"), &[input.as_str()], move |s| {
                Ok(Value::from(number(s, &dep) * 10.0 + f64::from(i)))
            })
            .unwrap();
        if i % 2 == 1 {
            g.deferred(step);
        }
    }
    g.build(1)
}

#[test]
fn one_cache_keeps_scopes_apart() {
    let clock = ManualClock::new(0.0);
    let dirty = written(&["in0"]);
    let mut cache = PlanCache::new(16);
    let mut program = ConvergeProgram::new(wide_sliced());
    let mut host = RecordingHost::new(wide_state(0));
    program.converge(ConvergeContext::new(&clock), &mut host).unwrap();

    let mut pass = |host: &mut RecordingHost, txn: u64, seed: i32, scope: SchedulingScope| {
        let mut next = host.state().clone();
        next.set_at(&path("in0"), Value::from(seed)).unwrap();
        host.write(next);
        let ctx = ConvergeContext::new(&clock)
            .txn_seq(txn)
            .dirty(DirtyInput::Paths(&dirty))
            .scope(scope)
            .plan_cache(&mut cache);
        program.converge(ctx, host).unwrap().decision.unwrap()
    };

    // out0 and out6 run immediately, out3 and out9 are deferred.
    let summary = pass(&mut host, 2, 7, SchedulingScope::Immediate);
    assert!(summary.has_reason(DecisionReason::CacheMiss));
    assert_eq!(summary.step_stats.affected_steps, Some(2));
    assert_eq!(host.state().get("out0"), Some(&Value::from(70)));
    assert_eq!(host.state().get("out3"), Some(&Value::from(3)));

    let summary = pass(&mut host, 3, 7, SchedulingScope::Deferred);
    assert!(summary.has_reason(DecisionReason::CacheMiss));
    assert_eq!(host.state().get("out3"), Some(&Value::from(73)));

    let summary = pass(&mut host, 4, 8, SchedulingScope::Immediate);
    assert!(summary.has_reason(DecisionReason::CacheHit));
    assert_eq!(host.state().get("out6"), Some(&Value::from(86)));
    assert_eq!(host.state().get("out9"), Some(&Value::from(79)));

    assert_eq!(cache.len(), 2);
}

#[test]
fn undeclared_reads_are_reported_once() {
    let graph = || {
        let mut g = GraphBuilder::new();
        // Declares `a` and `unused` but also reads `b`.
        g.computed("total", &["a", "unused"], |s| {
            Ok(Value::from(number(s, &path("a")) + number(s, &path("b"))))
        })
        .unwrap();
        g.link("copy", "total").unwrap();
        g.build(1)
    };
    let mut program = ConvergeProgram::with_config(
        graph(),
        ConvergeConfig {
            diagnostics: DiagnosticsLevel::Full,
            ..ConvergeConfig::default()
        },
    );
    let clock = ManualClock::new(0.0);
    let mut host = RecordingHost::new(Value::object([("a", Value::from(1)), ("b", Value::from(2))]));

    let report = program.converge(ConvergeContext::new(&clock), &mut host).unwrap();
    let summary = report.decision.unwrap();
    assert_eq!(summary.deps_mismatches.len(), 1);
    let mismatch = &summary.deps_mismatches[0];
    assert_eq!(mismatch.label, "computed:total");
    assert_eq!(mismatch.diff.missing, vec!["b"]);
    assert_eq!(mismatch.diff.unused, vec!["unused"]);
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["deps_mismatches"][0]["diff"]["missing"][0], "b");

    let again = ConvergeContext::new(&clock)
        .txn_seq(2)
        .requested_mode(RequestedMode::Full);
    let report = program.converge(again, &mut host).unwrap();
    assert!(report.decision.unwrap().deps_mismatches.is_empty());

    program.set_graph(graph());
    let report = program
        .converge(ConvergeContext::new(&clock).txn_seq(3), &mut host)
        .unwrap();
    assert_eq!(report.decision.unwrap().deps_mismatches.len(), 1);
}

#[test]
fn non_positive_decision_budgets_are_ignored() {
    let config = ConvergeConfig {
        check_interval: 1,
        ..ConvergeConfig::default()
    };
    let mut program = ConvergeProgram::with_config(
        {
            let mut g = GraphBuilder::new();
            for i in 0..40_i32 {
                let input = format!("in{}", i % 4);
                let dep = path(&input);
                g.computed(&format!("out{i}"), &[input.as_str()], move |s| {
                    Ok(Value::from(number(s, &dep) + f64::from(i)))
                })
                .unwrap();
            }
            g.build(1)
        },
        config,
    );
    // Every reading is one millisecond after the last.
    let ticks = std::cell::Cell::new(0.0);
    let clock = || {
        let now = ticks.get();
        ticks.set(now + 1.0);
        now
    };
    let mut host = RecordingHost::new(Value::object([("in0", Value::from(1))]));
    program.converge(ConvergeContext::new(&clock), &mut host).unwrap();

    let dirty = written(&["in0"]);
    for (txn, budget) in [(2, 0.0), (3, -1.0), (4, f64::INFINITY), (5, f64::NAN)] {
        let ctx = ConvergeContext::new(&clock)
            .txn_seq(txn)
            .dirty(DirtyInput::Paths(&dirty))
            .decision_budget_ms(budget);
        let summary = program.converge(ctx, &mut host).unwrap().decision.unwrap();
        assert!(!summary.has_reason(DecisionReason::BudgetCutoff), "budget {budget}");
        assert_eq!(summary.executed_mode, ExecutionMode::Dirty);
        assert_eq!(summary.decision_budget_ms, None);
    }

    let ctx = ConvergeContext::new(&clock)
        .txn_seq(6)
        .dirty(DirtyInput::Paths(&dirty))
        .decision_budget_ms(0.5);
    let summary = program.converge(ctx, &mut host).unwrap().decision.unwrap();
    assert!(summary.has_reason(DecisionReason::BudgetCutoff));
    assert_eq!(summary.executed_mode, ExecutionMode::Full);
}

const INPUTS: usize = 4;

/// One derived step: input picks among earlier nodes, whether it is a link,
/// and a constant added to the sum of its inputs.
type StepShape = (Vec<Index>, bool, i32);

fn node_name(node: usize, nested: bool) -> String {
    match node.checked_sub(INPUTS) {
        None => format!("in{node}"),
        Some(j) if nested => format!("out.d{j}"),
        Some(j) => format!("d{j}"),
    }
}

fn random_graph(steps: &[StepShape], nested: bool) -> StaticIr {
    let mut g = GraphBuilder::new();
    for (j, (picks, link, bias)) in steps.iter().enumerate() {
        let mut deps: Vec<usize> = picks.iter().map(|p| p.index(INPUTS + j)).collect();
        deps.sort_unstable();
        deps.dedup();
        let names: Vec<String> = deps.iter().map(|&d| node_name(d, nested)).collect();
        let output = node_name(INPUTS + j, nested);
        if *link && !names.is_empty() {
            g.link(&output, &names[0]).unwrap();
            continue;
        }
        let dep_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let paths: Vec<FieldPath> = names.iter().map(|n| path(n)).collect();
        let bias = f64::from(*bias);
        g.computed(&output, &dep_refs, move |s| {
            Ok(Value::from(paths.iter().map(|p| number(s, p)).sum::<f64>() + bias))
        })
        .unwrap();
    }
    g.build(1)
}

fn input_state(values: &[i32]) -> Value {
    Value::object(
        values
            .iter()
            .enumerate()
            .map(|(k, &v)| (format!("in{k}"), Value::from(v))),
    )
}

proptest! {
    #[test]
    fn full_and_dirty_agree(
        steps in vec((vec(any::<Index>(), 0..3), any::<bool>(), -3i32..3), 1..16),
        nested in any::<bool>(),
        initial in vec(-10i32..10, INPUTS),
        edits in vec((0..INPUTS, -10i32..10), 1..4),
    ) {
        let clock = ManualClock::new(0.0);
        let mut full = ConvergeProgram::new(random_graph(&steps, nested));
        let mut dirty = ConvergeProgram::new(random_graph(&steps, nested));
        let mut full_host = RecordingHost::new(input_state(&initial));
        let mut dirty_host = RecordingHost::new(input_state(&initial));
        full.converge(ConvergeContext::new(&clock), &mut full_host).unwrap();
        dirty.converge(ConvergeContext::new(&clock), &mut dirty_host).unwrap();
        prop_assert_eq!(full_host.state(), dirty_host.state());

        let mut next = full_host.state().clone();
        for &(k, v) in &edits {
            next.set_at(&path(&format!("in{k}")), Value::from(v)).unwrap();
        }
        full_host.write(next.clone());
        dirty_host.write(next);

        let names: Vec<String> = edits.iter().map(|(k, _)| format!("in{k}")).collect();
        let written: Vec<DirtyPath<'_>> = names.iter().map(|n| DirtyPath::Dotted(n)).collect();
        let full_report = full
            .converge(
                ConvergeContext::new(&clock)
                    .txn_seq(2)
                    .dirty(DirtyInput::Paths(&written))
                    .requested_mode(RequestedMode::Full),
                &mut full_host,
            )
            .unwrap();
        let dirty_report = dirty
            .converge(
                ConvergeContext::new(&clock)
                    .txn_seq(2)
                    .dirty(DirtyInput::Paths(&written))
                    .requested_mode(RequestedMode::Dirty),
                &mut dirty_host,
            )
            .unwrap();

        prop_assert_eq!(full_host.state(), dirty_host.state());
        prop_assert_eq!(&full_report.outcome, &dirty_report.outcome);
        let full_stats = full_report.decision.unwrap().step_stats;
        let dirty_stats = dirty_report.decision.unwrap().step_stats;
        prop_assert_eq!(full_stats.changed_steps, dirty_stats.changed_steps);
        prop_assert!(dirty_stats.executed_steps <= full_stats.executed_steps);
    }
}
