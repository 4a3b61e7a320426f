// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interned field paths and their prefix relation.
//!
//! Derived steps declare their inputs and output as field paths such as
//! `profile.address.city`. The engine never works on the strings directly:
//! every path is interned into a compact [`FieldPathId`], and interning a path
//! also interns each of its prefixes (`profile`, `profile.address`, ...).
//!
//! For each interned path the registry keeps the ids of all of its prefixes,
//! shortest first and including the path itself. Writing to `a.b.c` dirties
//! exactly the prefixes `a`, `a.b` and `a.b.c`.
//!
//! ## Example
//!
//! ```rust
//! use understory_converge::{FieldPath, FieldPathRegistry};
//!
//! let mut paths = FieldPathRegistry::new();
//! let city = paths.intern(FieldPath::parse("profile.address.city").unwrap());
//! let profile = paths.lookup_str("profile").unwrap();
//!
//! let prefixes = paths.prefixes(city);
//! assert_eq!(prefixes.len(), 3);
//! assert_eq!(prefixes[0], profile);
//! assert_eq!(prefixes[2], city);
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::hash::BuildHasher;

use hashbrown::DefaultHashBuilder;
use hashbrown::HashMap;
use smallvec::SmallVec;

/// A compact, interned field path identifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct FieldPathId(u32);

impl FieldPathId {
    /// Creates an id from its raw value.
    ///
    /// Ids are only meaningful for the registry that produced them.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns this id as a `usize` index (for tables keyed by path ids).
    #[inline]
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// A normalized, non-empty field path.
///
/// Ordering is lexicographic by segment, with a prefix ordered before any of
/// its extensions.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FieldPath(SmallVec<[Box<str>; 4]>);

impl FieldPath {
    /// Parses a dot-separated path such as `items[2].label`.
    ///
    /// Array positions are not tracked: `items[2]`, `items[]` and the numeric
    /// segment in `items.2` all normalize to `items`. Returns `None` for an
    /// empty path, the wildcard `*`, or malformed brackets.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let mut segments: SmallVec<[Box<str>; 4]> = SmallVec::new();
        for part in path.split('.') {
            if part.is_empty() {
                continue;
            }
            if part == "*" {
                return None;
            }
            if part.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let base = match part.find('[') {
                Some(open) => {
                    let rest = &part[open..];
                    let index = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']'))?;
                    if !index.bytes().all(|b| b.is_ascii_digit()) {
                        return None;
                    }
                    &part[..open]
                }
                None => part,
            };
            if base.is_empty() || base.contains(']') {
                return None;
            }
            segments.push(base.into());
        }
        if segments.is_empty() {
            None
        } else {
            Some(Self(segments))
        }
    }

    /// Builds a path from already-normalized segments.
    ///
    /// Returns `None` if there are no segments or any segment is empty.
    #[must_use]
    pub fn from_segments<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Box<str>>,
    {
        let segments: SmallVec<[Box<str>; 4]> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            None
        } else {
            Some(Self(segments))
        }
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[Box<str>] {
        &self.0
    }

    /// Returns the number of segments (always at least one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; paths are non-empty by construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` for a single-segment (top-level) path.
    #[must_use]
    pub fn is_shallow(&self) -> bool {
        self.0.len() == 1
    }

    /// Returns `true` if `self` is a prefix of `other` (or equal to it).
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Returns the first `len` segments as a new path.
    fn truncated(&self, len: usize) -> Self {
        Self(self.0[..len].iter().cloned().collect())
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({self})")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(seg)?;
        }
        Ok(())
    }
}

/// Interns [`FieldPath`]s into [`FieldPathId`]s and records prefix chains.
///
/// Paths are stored once. Lookups use a hash-bucket index (hash -> small list
/// of candidate ids) to avoid storing duplicate path copies.
#[derive(Debug, Clone)]
pub struct FieldPathRegistry {
    paths: Vec<FieldPath>,
    buckets: HashMap<u64, SmallVec<[FieldPathId; 1]>>,
    build_hasher: DefaultHashBuilder,
    /// Prefix ids of every path, concatenated; see `prefix_offsets`.
    prefix_ids: Vec<FieldPathId>,
    /// `prefix_offsets[id]` is where the prefix chain of `id` starts.
    prefix_offsets: Vec<u32>,
}

impl Default for FieldPathRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldPathRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            buckets: HashMap::new(),
            build_hasher: DefaultHashBuilder::default(),
            prefix_ids: Vec::new(),
            prefix_offsets: Vec::new(),
        }
    }

    /// Returns the number of interned paths (prefixes included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns `true` if nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Returns the path for an id, if the id is in range.
    #[must_use]
    pub fn get(&self, id: FieldPathId) -> Option<&FieldPath> {
        self.paths.get(id.as_usize())
    }

    /// Iterates all interned paths in id order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldPathId, &FieldPath)> + '_ {
        (0_u32..)
            .zip(self.paths.iter())
            .map(|(i, p)| (FieldPathId(i), p))
    }

    /// Returns the id of `path` if it has been interned.
    #[must_use]
    pub fn lookup(&self, path: &FieldPath) -> Option<FieldPathId> {
        let hash = self.build_hasher.hash_one(path);
        self.buckets
            .get(&hash)?
            .iter()
            .copied()
            .find(|id| self.paths[id.as_usize()] == *path)
    }

    /// Parses `path` and returns its id if it has been interned.
    #[must_use]
    pub fn lookup_str(&self, path: &str) -> Option<FieldPathId> {
        self.lookup(&FieldPath::parse(path)?)
    }

    /// Returns the id of the longest interned prefix of `path` (possibly
    /// `path` itself).
    #[must_use]
    pub fn longest_registered_prefix(&self, path: &FieldPath) -> Option<FieldPathId> {
        (1..=path.len())
            .rev()
            .find_map(|len| self.lookup(&path.truncated(len)))
    }

    /// Interns `path` and all of its prefixes, returning the id of `path`.
    ///
    /// If an equal path was already interned, this returns the existing id.
    pub fn intern(&mut self, path: FieldPath) -> FieldPathId {
        if let Some(id) = self.lookup(&path) {
            return id;
        }

        let mut chain: SmallVec<[FieldPathId; 8]> = SmallVec::new();
        let mut id = FieldPathId(0);
        for len in 1..=path.len() {
            let prefix = if len == path.len() {
                path.clone()
            } else {
                path.truncated(len)
            };
            id = match self.lookup(&prefix) {
                Some(existing) => existing,
                None => self.push(prefix, &chain),
            };
            chain.push(id);
        }
        id
    }

    /// Parses and interns a dotted path.
    pub fn intern_str(&mut self, path: &str) -> Option<FieldPathId> {
        Some(self.intern(FieldPath::parse(path)?))
    }

    /// Returns the prefix chain of `id`: shortest prefix first, `id` last.
    ///
    /// Returns an empty slice for an unknown id.
    #[must_use]
    pub fn prefixes(&self, id: FieldPathId) -> &[FieldPathId] {
        let idx = id.as_usize();
        let Some(&start) = self.prefix_offsets.get(idx) else {
            return &[];
        };
        let end = self
            .prefix_offsets
            .get(idx + 1)
            .map_or(self.prefix_ids.len(), |&e| e as usize);
        &self.prefix_ids[start as usize..end]
    }

    fn push(&mut self, path: FieldPath, parents: &[FieldPathId]) -> FieldPathId {
        let id = FieldPathId(
            u32::try_from(self.paths.len()).expect("too many interned field paths for FieldPathId (u32)"),
        );
        let hash = self.build_hasher.hash_one(&path);
        self.paths.push(path);
        self.buckets.entry(hash).or_default().push(id);

        self.prefix_offsets.push(
            u32::try_from(self.prefix_ids.len()).expect("prefix table exceeds u32 offsets"),
        );
        self.prefix_ids.extend_from_slice(parents);
        self.prefix_ids.push(id);
        id
    }
}
