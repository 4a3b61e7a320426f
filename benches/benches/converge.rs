// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use understory_converge::{
    ConvergeContext, ConvergeProgram, DirtyInput, DirtyPath, FieldPath, GraphBuilder,
    ManualClock, PlanCache, RecordingHost, RequestedMode, StaticIr, Value,
};

const INPUTS: u32 = 16;

#[derive(Clone)]
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u32(&mut self) -> u32 {
        // Numerical Recipes LCG parameters.
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 32) as u32
    }

    fn gen_range_u32(&mut self, upper_exclusive: u32) -> u32 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u32() % upper_exclusive
    }
}

fn node_name(node: u32) -> String {
    if node < INPUTS {
        format!("in{node}")
    } else {
        format!("d{}", node - INPUTS)
    }
}

/// `n` derived fields, each summing up to `deps_per_step` earlier nodes.
fn build_dag(n: u32, deps_per_step: u32, seed: u64) -> StaticIr {
    let mut graph = GraphBuilder::new();
    let mut rng = Lcg::new(seed);
    for j in 0..n {
        let node = INPUTS + j;
        let mut deps: Vec<u32> = (0..deps_per_step.min(node))
            .map(|_| rng.gen_range_u32(node))
            .collect();
        deps.sort_unstable();
        deps.dedup();
        let names: Vec<String> = deps.iter().map(|&d| node_name(d)).collect();
        let dep_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let paths: Vec<FieldPath> = names
            .iter()
            .map(|name| FieldPath::parse(name).expect("generated names are valid paths"))
            .collect();
        graph
            .computed(&node_name(node), &dep_refs, move |state| {
                let sum: f64 = paths
                    .iter()
                    .filter_map(|p| state.get_at(p).and_then(Value::as_f64))
                    .sum();
                Ok(Value::from(sum % 1_000.0))
            })
            .expect("generated names are valid paths");
    }
    graph.build(1)
}

fn inputs(seed: i32) -> Value {
    Value::object((0..INPUTS).map(|k| (format!("in{k}"), Value::from(seed))))
}

/// A program and a host that has already converged once.
fn warm(n: u32, deps_per_step: u32) -> (ConvergeProgram, RecordingHost) {
    let clock = ManualClock::new(0.0);
    let mut program = ConvergeProgram::new(build_dag(n, deps_per_step, 0xC0DE_0000_0000_0001));
    let mut host = RecordingHost::new(inputs(1));
    program
        .converge(ConvergeContext::new(&clock), &mut host)
        .expect("generated graphs are acyclic");
    host.take_patches();
    (program, host)
}

fn write_input(host: &mut RecordingHost, key: &str, value: i32) {
    let mut next = host.state().clone();
    next.set_at(&FieldPath::parse(key).expect("valid path"), Value::from(value))
        .expect("inputs live in an object");
    host.write(next);
}

fn bench_converge(c: &mut Criterion) {
    let mut group = c.benchmark_group("understory_converge");
    group.sample_size(50);

    for &(n, deps_per_step) in &[(256_u32, 2_u32), (4_096_u32, 2_u32), (4_096_u32, 4_u32)] {
        group.bench_function(format!("build(n={n},d={deps_per_step})"), |b| {
            b.iter(|| black_box(build_dag(n, deps_per_step, 0xC0DE_0000_0000_0001)));
        });

        for (label, mode) in [("full", RequestedMode::Full), ("dirty", RequestedMode::Dirty)] {
            group.bench_function(
                format!("{label}_after_one_write(n={n},d={deps_per_step})"),
                |b| {
                    b.iter_batched(
                        || {
                            let (program, mut host) = warm(n, deps_per_step);
                            write_input(&mut host, "in3", 7);
                            (program, host)
                        },
                        |(mut program, mut host)| {
                            let clock = ManualClock::new(0.0);
                            let written = [DirtyPath::Dotted("in3")];
                            let ctx = ConvergeContext::new(&clock)
                                .txn_seq(2)
                                .dirty(DirtyInput::Paths(&written))
                                .requested_mode(mode);
                            black_box(program.converge(ctx, &mut host).ok());
                            black_box(host);
                        },
                        BatchSize::LargeInput,
                    );
                },
            );
        }

        // Alternating writes to the same input so every pass after the first
        // hits the plan cache.
        group.bench_function(
            format!("auto_cached_alternating(n={n},d={deps_per_step})"),
            |b| {
                b.iter_batched(
                    || warm(n, deps_per_step),
                    |(mut program, mut host)| {
                        let clock = ManualClock::new(0.0);
                        let mut cache = PlanCache::new(32);
                        let written = [DirtyPath::Dotted("in0")];
                        for txn in 2..10_u64 {
                            write_input(&mut host, "in0", i32::from(txn % 2 == 0));
                            let ctx = ConvergeContext::new(&clock)
                                .txn_seq(txn)
                                .dirty(DirtyInput::Paths(&written))
                                .plan_cache(&mut cache);
                            black_box(program.converge(ctx, &mut host).ok());
                        }
                        black_box(cache.hits());
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_converge);
criterion_main!(benches);
