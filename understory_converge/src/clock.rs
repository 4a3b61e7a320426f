// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Time sources and sampled budget checks.

use core::cell::Cell;

/// A monotonic millisecond clock.
pub trait Clock {
    /// Current time in milliseconds. Only differences are meaningful.
    fn now_ms(&self) -> f64;
}

impl<F> Clock for F
where
    F: Fn() -> f64,
{
    fn now_ms(&self) -> f64 {
        self()
    }
}

/// A clock that only moves when told to.
///
/// ```rust
/// use understory_converge::{Clock, ManualClock};
///
/// let clock = ManualClock::new(10.0);
/// clock.advance(5.0);
/// assert_eq!(clock.now_ms(), 15.0);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    #[must_use]
    pub fn new(start_ms: f64) -> Self {
        Self {
            now: Cell::new(start_ms),
        }
    }

    /// Sets the reading.
    pub fn set(&self, now_ms: f64) {
        self.now.set(now_ms);
    }

    /// Moves the reading forward by `delta_ms`.
    pub fn advance(&self, delta_ms: f64) {
        self.now.set(self.now.get() + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

/// Wall clock backed by [`std::time::Instant`].
#[cfg(feature = "std")]
#[derive(Copy, Clone, Debug)]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl SystemClock {
    /// Creates a clock whose zero is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Checks a millisecond budget every `interval` ticks.
///
/// Reading the clock is the expensive part of a tight loop, so most ticks only
/// bump a counter.
pub(crate) struct BudgetGuard<'c> {
    clock: &'c dyn Clock,
    started_ms: f64,
    budget_ms: f64,
    interval: u32,
    counter: u32,
}

impl<'c> BudgetGuard<'c> {
    /// Starts the budget now. An `interval` of zero behaves like one.
    pub(crate) fn start(clock: &'c dyn Clock, budget_ms: f64, interval: u32) -> Self {
        Self {
            clock,
            started_ms: clock.now_ms(),
            budget_ms,
            interval: interval.max(1),
            counter: 0,
        }
    }

    /// Counts one iteration; returns `true` if this tick sampled the clock and
    /// found the budget spent.
    #[inline]
    pub(crate) fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter < self.interval {
            return false;
        }
        self.counter = 0;
        self.exceeded()
    }

    /// Samples the clock now.
    pub(crate) fn exceeded(&self) -> bool {
        self.elapsed_ms() > self.budget_ms
    }

    /// Milliseconds since the guard started, never negative.
    pub(crate) fn elapsed_ms(&self) -> f64 {
        (self.clock.now_ms() - self.started_ms).max(0.0)
    }

    /// When the guard started.
    pub(crate) fn started_ms(&self) -> f64 {
        self.started_ms
    }
}
