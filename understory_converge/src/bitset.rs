// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dense bitset over small integer ids.

use alloc::vec;
use alloc::vec::Vec;

/// A growable bitset for dense ids (`0..capacity`).
///
/// Used for per-pass membership (dirty prefixes, reachable steps) where a hash
/// set would dominate the cost of the traversal itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DenseIdBitSet {
    words: Vec<u64>,
}

impl DenseIdBitSet {
    /// Creates a bitset able to hold ids `0..capacity` without growing.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
        }
    }

    /// Inserts `id`, returning `true` if it was not present.
    #[inline]
    pub(crate) fn insert(&mut self, id: usize) -> bool {
        let (word, mask) = (id / 64, 1_u64 << (id % 64));
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let was_set = self.words[word] & mask != 0;
        self.words[word] |= mask;
        !was_set
    }

    /// Returns `true` if `id` is present.
    #[inline]
    pub(crate) fn contains(&self, id: usize) -> bool {
        self.words
            .get(id / 64)
            .is_some_and(|w| w & (1_u64 << (id % 64)) != 0)
    }

    /// Removes every id, keeping capacity.
    pub(crate) fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Returns `true` if no id is present.
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns the number of ids present.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
