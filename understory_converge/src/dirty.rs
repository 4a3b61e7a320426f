// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty-root resolution.
//!
//! A transaction reports what it wrote as a [`DirtyInput`]. Before planning,
//! the engine turns that into a canonical [`DirtyRootSet`]: interned ids,
//! deduplicated, prefix-free (a write to `a` already covers `a.b`), sorted, and
//! hashed into a stable key for the plan cache.
//!
//! Anything that cannot be tracked precisely widens to
//! [`DirtyRootSet::All`] instead of silently converging nothing.
//!
//! ```rust
//! use understory_converge::{
//!     DirtyInput, DirtyPath, DirtyRootSet, FieldPathRegistry, resolve_dirty_roots,
//! };
//!
//! let mut paths = FieldPathRegistry::new();
//! let a = paths.intern_str("a").unwrap();
//! paths.intern_str("a.b").unwrap();
//!
//! let written = [DirtyPath::Dotted("a.b"), DirtyPath::Dotted("a")];
//! let roots = resolve_dirty_roots(&paths, &DirtyInput::Paths(&written));
//! assert_eq!(roots.root_ids(), &[a]);
//! ```

use alloc::vec::Vec;
use core::hash::Hasher;

use serde::{Deserialize, Serialize};

use crate::fnv::Fnv1a;
use crate::path::{FieldPath, FieldPathId, FieldPathRegistry};

/// Why a transaction is treated as having written everything.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyAllReason {
    /// The write set is unknown or contained a wildcard.
    UnknownWrite,
    /// The caller mutated state through a path the engine cannot see.
    CustomMutation,
    /// A written path could not be parsed.
    NonTrackablePatch,
    /// A written id is not part of the registry.
    FallbackPolicy,
}

/// One written location.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DirtyPath<'a> {
    /// An interned id.
    Id(FieldPathId),
    /// A dotted path string; `*` marks an unknown write.
    Dotted(&'a str),
    /// An already parsed path.
    Path(&'a FieldPath),
}

/// What a transaction reports about its writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DirtyInput<'a> {
    /// Everything may have changed.
    All(DirtyAllReason),
    /// These locations were written. An empty list means "unknown".
    Paths(&'a [DirtyPath<'a>]),
    /// Nothing was written.
    Clean,
}

/// Canonical dirty set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirtyRootSet {
    /// Treat every field as written.
    All {
        /// Why precise tracking was abandoned.
        reason: DirtyAllReason,
    },
    /// Specific, prefix-free roots.
    Roots {
        /// Sorted ascending; no id is a prefix of another.
        root_ids: Vec<FieldPathId>,
        /// FNV-1a over `root_ids`.
        key_hash: u64,
    },
    /// Known to have written nothing a step can observe.
    Clean,
}

impl DirtyRootSet {
    /// The root ids; empty for `All` and `Clean`.
    #[must_use]
    pub fn root_ids(&self) -> &[FieldPathId] {
        match self {
            Self::Roots { root_ids, .. } => root_ids,
            Self::All { .. } | Self::Clean => &[],
        }
    }

    /// Number of roots (also the cache key size).
    #[must_use]
    pub fn root_count(&self) -> usize {
        self.root_ids().len()
    }

    /// Cache key hash, for `Roots` only.
    #[must_use]
    pub fn key_hash(&self) -> Option<u64> {
        match self {
            Self::Roots { key_hash, .. } => Some(*key_hash),
            Self::All { .. } | Self::Clean => None,
        }
    }

    /// The widening reason, for `All` only.
    #[must_use]
    pub fn all_reason(&self) -> Option<DirtyAllReason> {
        match self {
            Self::All { reason } => Some(*reason),
            Self::Roots { .. } | Self::Clean => None,
        }
    }
}

/// Hashes sorted root ids into a cache key.
#[must_use]
pub fn root_key_hash(root_ids: &[FieldPathId]) -> u64 {
    let mut h = Fnv1a::default();
    for id in root_ids {
        h.write(&id.as_u32().to_le_bytes());
    }
    h.finish()
}

/// Canonicalizes `input` against the registered paths.
///
/// A parsable path that was never registered resolves to its longest
/// registered prefix; if it has none, no step can observe it and it is dropped.
#[must_use]
pub fn resolve_dirty_roots(paths: &FieldPathRegistry, input: &DirtyInput<'_>) -> DirtyRootSet {
    let written = match *input {
        DirtyInput::All(reason) => return DirtyRootSet::All { reason },
        DirtyInput::Clean => return DirtyRootSet::Clean,
        DirtyInput::Paths([]) => {
            return DirtyRootSet::All {
                reason: DirtyAllReason::UnknownWrite,
            };
        }
        DirtyInput::Paths(written) => written,
    };

    let mut ids: Vec<FieldPathId> = Vec::with_capacity(written.len());
    for path in written {
        let resolved = match *path {
            DirtyPath::Id(id) => {
                if paths.get(id).is_none() {
                    return DirtyRootSet::All {
                        reason: DirtyAllReason::FallbackPolicy,
                    };
                }
                Some(id)
            }
            DirtyPath::Dotted(dotted) => {
                if dotted.split('.').any(|seg| seg == "*") {
                    return DirtyRootSet::All {
                        reason: DirtyAllReason::UnknownWrite,
                    };
                }
                let Some(parsed) = FieldPath::parse(dotted) else {
                    return DirtyRootSet::All {
                        reason: DirtyAllReason::NonTrackablePatch,
                    };
                };
                paths.longest_registered_prefix(&parsed)
            }
            DirtyPath::Path(parsed) => paths.longest_registered_prefix(parsed),
        };
        ids.extend(resolved);
    }

    ids.sort_unstable();
    ids.dedup();
    // Drop ids covered by a shorter root. The last prefix is the id itself.
    let candidates = ids.clone();
    ids.retain(|&id| {
        let chain = paths.prefixes(id);
        !chain[..chain.len().saturating_sub(1)]
            .iter()
            .any(|p| candidates.binary_search(p).is_ok())
    });

    if ids.is_empty() {
        return DirtyRootSet::Clean;
    }
    let key_hash = root_key_hash(&ids);
    DirtyRootSet::Roots {
        root_ids: ids,
        key_hash,
    }
}
