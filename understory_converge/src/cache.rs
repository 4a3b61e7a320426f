// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded plan cache keyed by dirty-root signatures.
//!
//! Entries are keyed by the root-set hash (mixed with the scheduling scope) and
//! the root ids themselves; ids are compared on lookup, so a hash collision is
//! a miss, never a foreign plan. Eviction is least-recently-used.
//!
//! A cache belongs to one graph at a time: [`PlanCache::sync_generation`]
//! drops every entry when the graph generation moves.

use alloc::boxed::Box;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::{ConvergeConfig, LowHitRatePolicy};
use crate::path::FieldPathId;
use crate::plan::ConvergePlan;

/// Why a cache stopped serving plans.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDisableReason {
    /// The graph generation keeps changing.
    GenerationThrash,
    /// Too few lookups hit.
    LowHitRate,
    /// Disabled by the host.
    Manual,
}

/// Why a lookup missed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMissReason {
    /// First time this root set was planned.
    NotCached,
    /// Entries were dropped because the graph changed.
    GenerationBumped,
    /// No better explanation.
    Unknown,
}

/// Serializable snapshot of cache state for one decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanCacheEvidence {
    /// Maximum entries.
    pub capacity: usize,
    /// Current entries.
    pub size: usize,
    /// Lifetime hits.
    pub hits: u64,
    /// Lifetime misses.
    pub misses: u64,
    /// Lifetime evictions.
    pub evicts: u64,
    /// Whether this decision hit.
    pub hit: bool,
    /// Number of roots in the looked-up key.
    pub key_size: usize,
    /// Why it missed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miss_reason: Option<CacheMissReason>,
    /// Whether the cache is disabled.
    pub disabled: bool,
    /// Why, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_reason: Option<CacheDisableReason>,
}

#[derive(Debug)]
struct Entry {
    root_ids: Box<[FieldPathId]>,
    plan: ConvergePlan,
    last_used: u64,
}

/// LRU cache of plans.
///
/// ```rust
/// use understory_converge::{ConvergePlan, FieldPathId, PlanCache, StepId};
///
/// let mut cache = PlanCache::new(2);
/// let roots = [FieldPathId::new(3)];
/// assert!(cache.get(7, &roots).is_none());
///
/// cache.insert(7, &roots, ConvergePlan::from(vec![StepId::new(1)]));
/// assert_eq!(cache.get(7, &roots).unwrap().steps(), &[StepId::new(1)]);
/// // Same hash, different roots: a miss.
/// assert!(cache.get(7, &[FieldPathId::new(4)]).is_none());
/// assert_eq!((cache.hits(), cache.misses()), (1, 2));
/// ```
#[derive(Debug)]
pub struct PlanCache {
    capacity: usize,
    buckets: HashMap<u64, SmallVec<[Entry; 1]>>,
    len: usize,
    tick: u64,
    hits: u64,
    misses: u64,
    evicts: u64,
    disabled: Option<CacheDisableReason>,
    generation: Option<u64>,
    low_hit_rate: Option<LowHitRatePolicy>,
}

impl PlanCache {
    /// Creates a cache holding up to `capacity` plans, with the default
    /// low-hit-rate rule.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buckets: HashMap::new(),
            len: 0,
            tick: 0,
            hits: 0,
            misses: 0,
            evicts: 0,
            disabled: None,
            generation: None,
            low_hit_rate: Some(LowHitRatePolicy::default()),
        }
    }

    /// Creates a cache with the capacity and low-hit-rate rule of `config`.
    #[must_use]
    pub fn from_config(config: &ConvergeConfig) -> Self {
        Self::new(config.plan_cache_capacity).with_low_hit_rate(config.low_hit_rate)
    }

    /// Replaces the low-hit-rate rule; `None` never auto-disables.
    #[must_use]
    pub fn with_low_hit_rate(mut self, policy: Option<LowHitRatePolicy>) -> Self {
        self.low_hit_rate = policy;
        self
    }

    /// Maximum number of plans.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached plans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lifetime hits.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lifetime misses.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Lifetime evictions.
    #[must_use]
    pub fn evicts(&self) -> u64 {
        self.evicts
    }

    /// Returns `true` once the cache has been disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled.is_some()
    }

    /// Why the cache is disabled.
    #[must_use]
    pub fn disable_reason(&self) -> Option<CacheDisableReason> {
        self.disabled
    }

    /// Stops serving and storing plans, dropping every entry.
    pub fn disable(&mut self, reason: CacheDisableReason) {
        if self.disabled.is_none() {
            tracing::debug!(?reason, hits = self.hits, misses = self.misses, "plan cache disabled");
            self.disabled = Some(reason);
        }
        self.clear();
    }

    /// Drops every entry and re-enables the cache. Counters are kept.
    pub fn reset(&mut self) {
        self.disabled = None;
        self.clear();
    }

    /// Aligns the cache with graph `generation`.
    ///
    /// Returns `true` if the cache had seen a different generation; its
    /// entries are dropped in that case.
    pub fn sync_generation(&mut self, generation: u64) -> bool {
        match self.generation.replace(generation) {
            Some(previous) if previous != generation => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Looks up the plan for `root_ids` under `key_hash`.
    pub fn get(&mut self, key_hash: u64, root_ids: &[FieldPathId]) -> Option<ConvergePlan> {
        if self.disabled.is_some() {
            return None;
        }
        self.tick += 1;
        let tick = self.tick;
        let found = self
            .buckets
            .get_mut(&key_hash)
            .and_then(|bucket| bucket.iter_mut().find(|e| *e.root_ids == *root_ids))
            .map(|entry| {
                entry.last_used = tick;
                entry.plan.clone()
            });
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.check_hit_rate();
        }
        found
    }

    /// Stores `plan` for `root_ids` under `key_hash`, evicting the least
    /// recently used plan when full. Ignored while disabled.
    pub fn insert(&mut self, key_hash: u64, root_ids: &[FieldPathId], plan: ConvergePlan) {
        if self.disabled.is_some() || self.capacity == 0 {
            return;
        }
        self.tick += 1;
        if let Some(entry) = self
            .buckets
            .get_mut(&key_hash)
            .and_then(|bucket| bucket.iter_mut().find(|e| *e.root_ids == *root_ids))
        {
            entry.plan = plan;
            entry.last_used = self.tick;
            return;
        }
        if self.len >= self.capacity {
            self.evict_lru();
        }
        self.buckets.entry(key_hash).or_default().push(Entry {
            root_ids: root_ids.into(),
            plan,
            last_used: self.tick,
        });
        self.len += 1;
    }

    /// Snapshot for diagnostics.
    #[must_use]
    pub fn evidence(
        &self,
        hit: bool,
        key_size: usize,
        miss_reason: Option<CacheMissReason>,
    ) -> PlanCacheEvidence {
        PlanCacheEvidence {
            capacity: self.capacity,
            size: self.len,
            hits: self.hits,
            misses: self.misses,
            evicts: self.evicts,
            hit,
            key_size,
            miss_reason: if hit { None } else { miss_reason },
            disabled: self.disabled.is_some(),
            disable_reason: self.disabled,
        }
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }

    fn check_hit_rate(&mut self) {
        let Some(policy) = self.low_hit_rate else {
            return;
        };
        let lookups = self.hits + self.misses;
        let rate = self.hits as f64 / lookups as f64;
        if lookups >= policy.min_lookups && rate < policy.min_hit_rate {
            self.disable(CacheDisableReason::LowHitRate);
        }
    }

    fn evict_lru(&mut self) {
        let victim = self
            .buckets
            .iter()
            .flat_map(|(&hash, bucket)| bucket.iter().enumerate().map(move |(i, e)| (e.last_used, hash, i)))
            .min();
        let Some((_, hash, index)) = victim else {
            return;
        };
        if let Some(bucket) = self.buckets.get_mut(&hash) {
            bucket.remove(index);
            if bucket.is_empty() {
                self.buckets.remove(&hash);
            }
            self.len -= 1;
            self.evicts += 1;
        }
    }
}
