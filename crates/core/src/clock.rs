// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for deterministic time in tests.
//!
//! All timeout and backoff logic reads an injected clock so the
//! rate-limit and recovery scenarios can be driven by `FakeClock::advance`.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic and wall-clock time.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Monotonic instant, for elapsed-time comparisons.
    fn now(&self) -> Instant;

    /// Wall-clock milliseconds since the Unix epoch.
    fn epoch_ms(&self) -> u64;
}

/// Real system clock.
#[derive(Clone, Default)]
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

/// Controllable clock for tests.
///
/// Starts at a fixed epoch and only moves when `advance` is called.
#[derive(Clone)]
pub struct FakeClock {
    start: Instant,
    epoch_base_ms: u64,
    offset: Arc<Mutex<Duration>>,
}

/// Arbitrary but stable test epoch (2023-11-14T22:13:20Z).
const FAKE_EPOCH_BASE_MS: u64 = 1_700_000_000_000;

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            epoch_base_ms: FAKE_EPOCH_BASE_MS,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move the clock forward. Affects all clones.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset += by;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }

    fn epoch_ms(&self) -> u64 {
        self.epoch_base_ms + self.offset.lock().as_millis() as u64
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
