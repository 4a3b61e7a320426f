// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compiled step graph.
//!
//! A [`GraphBuilder`] collects derived-field declarations and compiles them into
//! a [`StaticIr`]: the interned paths, the steps in declaration order, and a
//! deterministic topological order.
//!
//! Step `T` depends on step `S` when the output of `S` and one of the inputs of
//! `T` are prefix-related: writing `profile` affects a reader of
//! `profile.name`, and writing `profile.name` affects a reader of `profile`.
//!
//! ```rust
//! use understory_converge::{GraphBuilder, Value};
//!
//! let mut graph = GraphBuilder::new();
//! let sum = graph
//!     .computed("sum", &["a", "b"], |s| {
//!         let a = s.get("a").and_then(Value::as_f64).unwrap_or(0.0);
//!         let b = s.get("b").and_then(Value::as_f64).unwrap_or(0.0);
//!         Ok(Value::from(a + b))
//!     })
//!     .unwrap();
//! let copy = graph.link("copy", "sum").unwrap();
//!
//! let ir = graph.build(1);
//! assert!(ir.config_error().is_none());
//! assert_eq!(ir.topo(), &[sum, copy]);
//! ```

use alloc::boxed::Box;
use alloc::collections::BinaryHeap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Reverse;
use core::hash::Hasher;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::error::{ConfigError, StepError};
use crate::fnv::Fnv1a;
use crate::path::{FieldPathId, FieldPathRegistry};
use crate::reads::StateReader;
use crate::step::{Scheduling, StepEntry, StepId, StepKind};
use crate::value::Value;

/// Collects step declarations for one graph generation.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    paths: FieldPathRegistry,
    steps: Vec<StepEntry>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a path that no step declares, so writes to it resolve exactly.
    pub fn register_path(&mut self, path: &str) -> Result<FieldPathId, ConfigError> {
        self.intern(path)
    }

    /// Declares a computed field: `output = derive(state)`.
    pub fn computed<F>(&mut self, output: &str, deps: &[&str], derive: F) -> Result<StepId, ConfigError>
    where
        F: Fn(&StateReader<'_>) -> Result<Value, StepError> + 'static,
    {
        let output = self.intern(output)?;
        let deps = deps
            .iter()
            .map(|d| self.intern(d))
            .collect::<Result<SmallVec<_>, _>>()?;
        Ok(self.push(
            StepKind::Computed {
                derive: Box::new(derive),
                equals: None,
            },
            output,
            deps,
            "computed",
        ))
    }

    /// Declares a link: `output` mirrors the value at `from`.
    pub fn link(&mut self, output: &str, from: &str) -> Result<StepId, ConfigError> {
        let output = self.intern(output)?;
        let from = self.intern(from)?;
        let mut deps = SmallVec::new();
        deps.push(from);
        Ok(self.push(StepKind::Link { from }, output, deps, "link"))
    }

    /// Marks a step as deferred under time slicing. Unknown ids are ignored.
    pub fn deferred(&mut self, step: StepId) -> &mut Self {
        if let Some(entry) = self.steps.get_mut(step.as_usize()) {
            entry.scheduling = Scheduling::Deferred;
        }
        self
    }

    /// Replaces the output equality of a computed step. Links and unknown ids
    /// are ignored.
    pub fn set_equals<F>(&mut self, step: StepId, equals: F) -> &mut Self
    where
        F: Fn(&Value, &Value) -> bool + 'static,
    {
        if let Some(StepEntry {
            kind: StepKind::Computed { equals: slot, .. },
            ..
        }) = self.steps.get_mut(step.as_usize())
        {
            *slot = Some(Box::new(equals));
        }
        self
    }

    /// Compiles the declarations.
    ///
    /// A graph with multiple writers for one field or with a cycle still builds;
    /// the error is kept in [`StaticIr::config_error`] and every converge pass
    /// over it fails before running a step.
    #[must_use]
    pub fn build(self, generation: u64) -> StaticIr {
        let Self { paths, steps } = self;
        let digest = digest(&paths, &steps);
        let (topo, config_error) = match check_single_writer(&paths, &steps) {
            Err(err) => (Vec::new(), Some(err)),
            Ok(()) => match topo_sort(&paths, &steps) {
                Ok(topo) => (topo, None),
                Err(err) => (Vec::new(), Some(err)),
            },
        };
        StaticIr {
            generation,
            paths,
            steps,
            topo,
            config_error,
            digest,
        }
    }

    fn intern(&mut self, path: &str) -> Result<FieldPathId, ConfigError> {
        self.paths.intern_str(path).ok_or_else(|| ConfigError::InvalidPath {
            path: path.to_string(),
        })
    }

    fn push(
        &mut self,
        kind: StepKind,
        output: FieldPathId,
        deps: SmallVec<[FieldPathId; 4]>,
        label_kind: &str,
    ) -> StepId {
        let id = StepId::new(
            u32::try_from(self.steps.len()).expect("too many steps for StepId (u32)"),
        );
        let label = match self.paths.get(output) {
            Some(path) => format!("{label_kind}:{path}"),
            None => format!("{label_kind}:?"),
        };
        self.steps.push(StepEntry {
            id,
            kind,
            output,
            deps,
            scheduling: Scheduling::Immediate,
            label: label.into_boxed_str(),
        });
        id
    }
}

/// A compiled step graph for one generation.
#[derive(Debug)]
pub struct StaticIr {
    generation: u64,
    paths: FieldPathRegistry,
    steps: Vec<StepEntry>,
    topo: Vec<StepId>,
    config_error: Option<ConfigError>,
    digest: u64,
}

impl StaticIr {
    /// The generation this graph was built for.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Interned paths.
    #[must_use]
    pub fn paths(&self) -> &FieldPathRegistry {
        &self.paths
    }

    /// Steps in declaration order (`steps()[i].id == StepId(i)`).
    #[must_use]
    pub fn steps(&self) -> &[StepEntry] {
        &self.steps
    }

    /// Returns one step.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&StepEntry> {
        self.steps.get(id.as_usize())
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if there are no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All steps in topological order; empty when the graph is invalid.
    #[must_use]
    pub fn topo(&self) -> &[StepId] {
        &self.topo
    }

    /// The compilation error, if any.
    #[must_use]
    pub fn config_error(&self) -> Option<&ConfigError> {
        self.config_error.as_ref()
    }

    /// Stable 64-bit digest of the declarations.
    #[must_use]
    pub fn digest(&self) -> u64 {
        self.digest
    }
}

fn path_string(paths: &FieldPathRegistry, id: FieldPathId) -> String {
    paths.get(id).map_or_else(|| format!("#{}", id.as_u32()), ToString::to_string)
}

fn check_single_writer(paths: &FieldPathRegistry, steps: &[StepEntry]) -> Result<(), ConfigError> {
    let mut writers: HashMap<FieldPathId, SmallVec<[StepId; 2]>> = HashMap::new();
    for step in steps {
        writers.entry(step.output).or_default().push(step.id);
    }
    // Report the contested field whose first writer was declared first.
    let contested = steps.iter().find_map(|s| {
        writers
            .get(&s.output)
            .filter(|w| w.len() > 1)
            .map(|w| (s.output, w))
    });
    match contested {
        Some((field, steps)) => Err(ConfigError::MultipleWriters {
            field: path_string(paths, field),
            steps: steps.to_vec(),
        }),
        None => Ok(()),
    }
}

/// Orders steps with Kahn's algorithm; ready steps leave in `StepId` order.
fn topo_sort(paths: &FieldPathRegistry, steps: &[StepEntry]) -> Result<Vec<StepId>, ConfigError> {
    let writer_by_out: HashMap<FieldPathId, StepId> =
        steps.iter().map(|s| (s.output, s.id)).collect();
    // Steps whose output lies at or below a given prefix.
    let mut writers_by_prefix: HashMap<FieldPathId, SmallVec<[StepId; 2]>> = HashMap::new();
    for step in steps {
        for &prefix in paths.prefixes(step.output) {
            writers_by_prefix.entry(prefix).or_default().push(step.id);
        }
    }

    let mut dependents: Vec<SmallVec<[StepId; 4]>> = vec![SmallVec::new(); steps.len()];
    let mut in_degree: Vec<usize> = vec![0; steps.len()];
    let mut upstream: SmallVec<[StepId; 8]> = SmallVec::new();
    for step in steps {
        upstream.clear();
        for &dep in &step.deps {
            // Writers at or above the dependency.
            upstream.extend(
                paths
                    .prefixes(dep)
                    .iter()
                    .filter_map(|p| writer_by_out.get(p).copied()),
            );
            // Writers strictly below it.
            if let Some(below) = writers_by_prefix.get(&dep) {
                upstream.extend(below.iter().copied());
            }
        }
        upstream.sort_unstable();
        upstream.dedup();
        for &from in &upstream {
            dependents[from.as_usize()].push(step.id);
            in_degree[step.id.as_usize()] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<StepId>> = steps
        .iter()
        .filter(|s| in_degree[s.id.as_usize()] == 0)
        .map(|s| Reverse(s.id))
        .collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for &next in &dependents[id.as_usize()] {
            let deg = &mut in_degree[next.as_usize()];
            *deg -= 1;
            if *deg == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == steps.len() {
        return Ok(order);
    }
    let mut fields: Vec<_> = steps
        .iter()
        .filter(|s| in_degree[s.id.as_usize()] > 0)
        .map(|s| path_string(paths, s.output))
        .collect();
    fields.sort();
    Err(ConfigError::Cycle { fields })
}

fn digest(paths: &FieldPathRegistry, steps: &[StepEntry]) -> u64 {
    let mut h = Fnv1a::default();
    let write_path = |h: &mut Fnv1a, id: FieldPathId| {
        if let Some(path) = paths.get(id) {
            for seg in path.segments() {
                h.write(seg.as_bytes());
                h.write(b".");
            }
        }
        h.write(b";");
    };
    for step in steps {
        h.write(match step.kind {
            StepKind::Computed { .. } => b"c",
            StepKind::Link { .. } => b"l",
        });
        h.write(match step.scheduling {
            Scheduling::Immediate => b"i",
            Scheduling::Deferred => b"d",
        });
        write_path(&mut h, step.output);
        for &dep in &step.deps {
            write_path(&mut h, dep);
        }
        h.write(b"|");
    }
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(v: f64) -> impl Fn(&StateReader<'_>) -> Result<Value, StepError> {
        move |_| Ok(Value::from(v))
    }

    #[test]
    fn chain_orders_by_dependency() {
        let mut g = GraphBuilder::new();
        let c = g.computed("c", &["b"], constant(0.0)).unwrap();
        let b = g.computed("b", &["a"], constant(0.0)).unwrap();
        let ir = g.build(1);
        assert_eq!(ir.topo(), &[b, c]);
        assert_eq!(ir.len(), 2);
        assert_eq!(&*ir.step(c).unwrap().label, "computed:c");
    }

    #[test]
    fn prefix_related_paths_create_edges() {
        let mut g = GraphBuilder::new();
        let parent_reader = g.computed("summary", &["profile"], constant(0.0)).unwrap();
        let child_writer = g.computed("profile.name", &["first"], constant(0.0)).unwrap();
        let leaf_reader = g.computed("greeting", &["profile.name.given"], constant(0.0)).unwrap();
        let leaf_writer = g.link("profile.name.given", "raw").unwrap();
        let ir = g.build(1);
        assert_eq!(
            ir.topo(),
            &[child_writer, leaf_writer, parent_reader, leaf_reader]
        );
    }

    #[test]
    fn independent_steps_keep_declaration_order() {
        let mut g = GraphBuilder::new();
        let ids: Vec<_> = ["x", "y", "z"]
            .iter()
            .map(|o| g.computed(o, &["in"], constant(1.0)).unwrap())
            .collect();
        assert_eq!(g.build(1).topo(), ids.as_slice());
    }

    #[test]
    fn multiple_writers_are_rejected() {
        let mut g = GraphBuilder::new();
        let a = g.computed("out", &["x"], constant(1.0)).unwrap();
        let b = g.link("out", "y").unwrap();
        let ir = g.build(1);
        assert!(ir.topo().is_empty());
        assert_eq!(
            ir.config_error(),
            Some(&ConfigError::MultipleWriters {
                field: "out".into(),
                steps: vec![a, b],
            })
        );
    }

    #[test]
    fn cycles_are_rejected_with_sorted_fields() {
        let mut g = GraphBuilder::new();
        g.computed("b", &["a"], constant(0.0)).unwrap();
        g.computed("a", &["b"], constant(0.0)).unwrap();
        g.computed("free", &["input"], constant(0.0)).unwrap();
        let ir = g.build(1);
        let err = ir.config_error().unwrap();
        assert_eq!(err.code(), "CYCLE_DETECTED");
        assert_eq!(
            err,
            &ConfigError::Cycle {
                fields: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn invalid_paths_fail_at_declaration() {
        let mut g = GraphBuilder::new();
        let err = g.computed("*", &[], constant(0.0)).unwrap_err();
        assert_eq!(err, ConfigError::InvalidPath { path: "*".into() });
        let err = g.link("ok", "").unwrap_err();
        assert_eq!(err.code(), "INVALID_PATH");
    }

    #[test]
    fn deferred_and_equals_apply_to_known_steps() {
        let mut g = GraphBuilder::new();
        let a = g.computed("a", &["in"], constant(0.0)).unwrap();
        g.deferred(a).set_equals(a, |_, _| true);
        g.deferred(StepId::new(42));
        let ir = g.build(1);
        let step = ir.step(a).unwrap();
        assert!(step.is_deferred());
        assert!(matches!(step.kind, StepKind::Computed { equals: Some(_), .. }));
    }

    #[test]
    fn digest_is_stable_and_sensitive() {
        let build = |out: &str| {
            let mut g = GraphBuilder::new();
            g.computed(out, &["in"], constant(0.0)).unwrap();
            g.build(7).digest()
        };
        assert_eq!(build("a"), build("a"));
        assert_ne!(build("a"), build("b"));
    }
}
