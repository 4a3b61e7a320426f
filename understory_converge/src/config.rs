// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine tuning.
//!
//! Every threshold the decision heuristic, planner, and cache consult lives in
//! [`ConvergeConfig`]. The defaults are the canonical table; hosts usually only
//! override a field or two:
//!
//! ```rust
//! use understory_converge::{ConvergeConfig, DiagnosticsLevel};
//!
//! let config: ConvergeConfig =
//!     serde_json::from_str(r#"{ "diagnostics": "full", "plan_cache_capacity": 16 }"#).unwrap();
//! assert_eq!(config.diagnostics, DiagnosticsLevel::Full);
//! assert_eq!(config.plan_cache_capacity, 16);
//! assert_eq!(config.near_full_root_threshold(600), 0.75);
//! ```

use alloc::vec;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

/// How much evidence a converge pass collects.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsLevel {
    /// No decision summary.
    Off,
    /// Mode, reasons, step counts, dirty summary.
    #[default]
    Light,
    /// Everything, including cache evidence and hotspots. Budgets are checked
    /// on every step.
    Full,
}

/// Near-full root threshold for graphs of at least `min_steps` steps.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearFullTier {
    /// Smallest step count this tier applies to.
    pub min_steps: usize,
    /// Root ratio at or above which the pass runs in full.
    pub ratio: f64,
}

/// Auto-disable rule for a plan cache that keeps missing.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LowHitRatePolicy {
    /// Lookups observed before the rule applies.
    pub min_lookups: u64,
    /// Hit rate below which the cache disables itself.
    pub min_hit_rate: f64,
}

impl Default for LowHitRatePolicy {
    fn default() -> Self {
        Self {
            min_lookups: 64,
            min_hit_rate: 0.1,
        }
    }
}

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergeConfig {
    /// Graphs with fewer steps plan by direct scan.
    pub small_graph_steps: usize,
    /// Loop iterations between clock samples.
    pub check_interval: u32,
    /// Largest root set whose plan may be cached.
    pub max_cacheable_root_ids: usize,
    /// Largest root/scope ratio whose plan may be cached.
    pub max_cacheable_root_ratio: f64,
    /// Near-full root thresholds by graph size, any order.
    pub near_full_root_tiers: Vec<NearFullTier>,
    /// Near-full root threshold below the smallest tier.
    pub near_full_root_ratio: f64,
    /// Plan/scope ratio at or above which an auto pass runs in full.
    pub near_full_plan_ratio: f64,
    /// Generation bumps at which a `GenerationBumped` miss disables the cache.
    pub generation_thrash_bumps: u32,
    /// Capacity for caches created with [`PlanCache::from_config`].
    ///
    /// [`PlanCache::from_config`]: crate::PlanCache::from_config
    pub plan_cache_capacity: usize,
    /// Cache auto-disable rule; `None` keeps the cache on regardless.
    pub low_hit_rate: Option<LowHitRatePolicy>,
    /// Permits the shallow in-place draft when every output is top-level.
    pub allow_in_place_draft: bool,
    /// Evidence level.
    pub diagnostics: DiagnosticsLevel,
    /// Longest error message kept in an error summary, in characters.
    pub error_message_limit: usize,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            small_graph_steps: 32,
            check_interval: 32,
            max_cacheable_root_ids: 128,
            max_cacheable_root_ratio: 0.5,
            near_full_root_tiers: vec![
                NearFullTier {
                    min_steps: 1536,
                    ratio: 0.65,
                },
                NearFullTier {
                    min_steps: 1024,
                    ratio: 0.7,
                },
                NearFullTier {
                    min_steps: 512,
                    ratio: 0.75,
                },
            ],
            near_full_root_ratio: 0.9,
            near_full_plan_ratio: 0.9,
            generation_thrash_bumps: 3,
            plan_cache_capacity: 128,
            low_hit_rate: Some(LowHitRatePolicy::default()),
            allow_in_place_draft: true,
            diagnostics: DiagnosticsLevel::Light,
            error_message_limit: 256,
        }
    }
}

impl ConvergeConfig {
    /// Near-full root threshold for a scope of `steps` steps.
    #[must_use]
    pub fn near_full_root_threshold(&self, steps: usize) -> f64 {
        self.near_full_root_tiers
            .iter()
            .filter(|t| steps >= t.min_steps)
            .max_by_key(|t| t.min_steps)
            .map_or(self.near_full_root_ratio, |t| t.ratio)
    }

    /// Clock-sample interval for execution at this diagnostics level.
    #[must_use]
    pub fn execution_check_interval(&self) -> u32 {
        match self.diagnostics {
            DiagnosticsLevel::Full => 1,
            DiagnosticsLevel::Off | DiagnosticsLevel::Light => self.check_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_table_is_canonical() {
        let c = ConvergeConfig::default();
        assert_eq!(c.near_full_root_threshold(0), 0.9);
        assert_eq!(c.near_full_root_threshold(511), 0.9);
        assert_eq!(c.near_full_root_threshold(512), 0.75);
        assert_eq!(c.near_full_root_threshold(1023), 0.75);
        assert_eq!(c.near_full_root_threshold(1024), 0.7);
        assert_eq!(c.near_full_root_threshold(1536), 0.65);
        assert_eq!(c.near_full_root_threshold(100_000), 0.65);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: ConvergeConfig =
            serde_json::from_str(r#"{ "allow_in_place_draft": false, "low_hit_rate": null }"#)
                .unwrap();
        assert!(!c.allow_in_place_draft);
        assert_eq!(c.low_hit_rate, None);
        assert_eq!(c.check_interval, 32);
        assert_eq!(c.execution_check_interval(), 32);

        let full = ConvergeConfig {
            diagnostics: DiagnosticsLevel::Full,
            ..ConvergeConfig::default()
        };
        assert_eq!(full.execution_check_interval(), 1);
    }
}
