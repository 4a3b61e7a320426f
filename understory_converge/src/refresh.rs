// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stale-result guard for background source refreshes.
//!
//! A source field is filled by an asynchronous fetch keyed by a hash of its
//! inputs. The engine never runs the fetch; [`SourceRefresh`] only tracks
//! which fetches are worth starting and which completions may still be
//! written back. A completion is accepted only while its key is the current
//! key, so a slow fetch for an old key can never overwrite a newer one.
//!
//! ```rust
//! use understory_converge::{RefreshPolicy, SourceRefresh};
//!
//! let mut refresh = SourceRefresh::new(RefreshPolicy::Switch);
//! let first = refresh.request(Some(1)).unwrap();
//! let second = refresh.request(Some(2)).unwrap();
//! assert!(!refresh.complete(first).accept);
//! assert!(refresh.complete(second).accept);
//! ```

/// How overlapping refreshes are handled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RefreshPolicy {
    /// Every new key starts a fetch and supersedes the one in flight.
    #[default]
    Switch,
    /// The fetch in flight runs to completion; keys requested meanwhile are
    /// coalesced into one trailing fetch for the latest key.
    ExhaustTrailing,
}

/// A fetch the host should start.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RefreshTicket {
    /// Key the fetch is for.
    pub key_hash: u64,
    /// Issue order; unique per [`SourceRefresh`].
    pub seq: u64,
}

/// What to do with a finished fetch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RefreshCompletion {
    /// The result may be written back.
    pub accept: bool,
    /// A trailing fetch to start now.
    pub next: Option<RefreshTicket>,
}

/// Refresh bookkeeping for one source field.
#[derive(Clone, Debug, Default)]
pub struct SourceRefresh {
    policy: RefreshPolicy,
    current: Option<u64>,
    in_flight: Option<RefreshTicket>,
    trailing: Option<u64>,
    next_seq: u64,
}

impl SourceRefresh {
    /// Creates an idle guard.
    #[must_use]
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// The policy.
    #[must_use]
    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// The key results must match to be accepted.
    #[must_use]
    pub fn current_key(&self) -> Option<u64> {
        self.current
    }

    /// The fetch believed to be running.
    #[must_use]
    pub fn in_flight(&self) -> Option<RefreshTicket> {
        self.in_flight
    }

    /// Records that the inputs now hash to `key_hash`.
    ///
    /// Returns a ticket when a fetch should start. `None` as the key clears the
    /// field: nothing in flight will be accepted and nothing trails. A key
    /// already in flight starts nothing.
    pub fn request(&mut self, key_hash: Option<u64>) -> Option<RefreshTicket> {
        self.current = key_hash;
        let Some(key_hash) = key_hash else {
            self.in_flight = None;
            self.trailing = None;
            return None;
        };
        match self.in_flight {
            Some(running) if running.key_hash == key_hash => {
                self.trailing = None;
                None
            }
            Some(_) if self.policy == RefreshPolicy::ExhaustTrailing => {
                self.trailing = Some(key_hash);
                None
            }
            _ => Some(self.start(key_hash)),
        }
    }

    /// Starts a fetch for `key_hash` even if one is in flight for it.
    pub fn force(&mut self, key_hash: u64) -> RefreshTicket {
        self.current = Some(key_hash);
        self.trailing = None;
        self.start(key_hash)
    }

    /// Reports that `ticket`'s fetch finished.
    pub fn complete(&mut self, ticket: RefreshTicket) -> RefreshCompletion {
        let accept = self.current == Some(ticket.key_hash);
        let mut next = None;
        if self.in_flight.is_some_and(|t| t.seq == ticket.seq) {
            self.in_flight = None;
            if let Some(key_hash) = self.trailing.take() {
                next = Some(self.start(key_hash));
            }
        }
        RefreshCompletion { accept, next }
    }

    fn start(&mut self, key_hash: u64) -> RefreshTicket {
        self.next_seq += 1;
        let ticket = RefreshTicket {
            key_hash,
            seq: self.next_seq,
        };
        self.in_flight = Some(ticket);
        ticket
    }
}
