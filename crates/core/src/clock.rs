// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time abstractions.
//!
//! All persisted timestamps are epoch milliseconds; `Instant` is used only
//! for in-process deadlines. Loops and stores take a [`Clock`] so tests can
//! drive staleness and backoff deterministically with [`FakeClock`].

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of time for stores and background loops.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Monotonic instant for in-process deadlines.
    fn now(&self) -> Instant;

    /// Wall-clock time as epoch milliseconds, for persisted timestamps.
    fn epoch_ms(&self) -> u64;
}

/// Production clock backed by the system time sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually-advanced clock for tests.
///
/// Cloning shares the offset, so a clock handed to a store and the one held
/// by the test advance together.
#[derive(Debug, Clone)]
pub struct FakeClock {
    base: Instant,
    epoch_base_ms: u64,
    offset: Arc<Mutex<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            epoch_base_ms: 1_700_000_000_000,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance both the monotonic and wall-clock views by `d`.
    pub fn advance(&self, d: Duration) {
        let mut offset = self.offset.lock();
        *offset += d;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn epoch_ms(&self) -> u64 {
        self.epoch_base_ms + self.offset.lock().as_millis() as u64
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
