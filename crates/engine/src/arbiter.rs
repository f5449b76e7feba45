// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate-limit arbiter.
//!
//! Single writer over the availability record; observers subscribe to a
//! watch channel and therefore see changes monotonically. Backoff is
//! exponential in consecutive hits, clamped to the session limit.

use crate::error::EngineError;
use parking_lot::Mutex;
use std::sync::Arc;
use taskd_core::{Clock, Config, IdGen, RateLimitState};
use taskd_storage::Store;
use tokio::sync::watch;
use tracing::{info, warn};

struct ArbiterInner<C: Clock, G: IdGen> {
    store: Store<C, G>,
    tx: watch::Sender<RateLimitState>,
    base_ms: u64,
    multiplier: f64,
    max_ms: u64,
}

/// Tracks agent service availability and schedules resume.
pub struct Arbiter<C: Clock, G: IdGen> {
    // One mutex around all writes keeps the event order total.
    inner: Arc<Mutex<ArbiterInner<C, G>>>,
    rx: watch::Receiver<RateLimitState>,
    clock: C,
}

impl<C: Clock, G: IdGen> Clone for Arbiter<C, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            rx: self.rx.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<C: Clock, G: IdGen> Arbiter<C, G> {
    /// Seed from the persisted record so a restart under an active
    /// rate limit stays paused until `resume_at`.
    pub fn new(store: Store<C, G>, clock: C, config: &Config) -> Self {
        let state = store.rate_limit();
        let (tx, rx) = watch::channel(state);
        Self {
            inner: Arc::new(Mutex::new(ArbiterInner {
                store,
                tx,
                base_ms: config.default_unban_wait_seconds * 1_000,
                multiplier: config.rate_limit_backoff_multiplier,
                max_ms: config.session_limit_seconds * 1_000,
            })),
            rx,
            clock,
        }
    }

    pub fn is_available(&self) -> bool {
        self.rx.borrow().available
    }

    /// Wall-clock deadline for the next probe, when unavailable.
    pub fn wait_until(&self) -> Option<u64> {
        let state = self.rx.borrow();
        if state.available {
            None
        } else {
            state.resume_at_ms
        }
    }

    pub fn state(&self) -> RateLimitState {
        self.rx.borrow().clone()
    }

    /// Subscribe to availability changes (monotonic view).
    pub fn subscribe(&self) -> watch::Receiver<RateLimitState> {
        self.rx.clone()
    }

    /// Worker-reported rate-limit hit.
    pub fn record_hit(&self, reason: &str) -> Result<RateLimitState, EngineError> {
        let inner = self.inner.lock();
        let previous = inner.tx.borrow().clone();
        let hits = previous.consecutive_hits + 1;
        let wait_ms = backoff_ms(inner.base_ms, inner.multiplier, inner.max_ms, hits);

        let state = RateLimitState {
            available: false,
            resume_at_ms: Some(self.clock.epoch_ms() + wait_ms),
            reason: Some(reason.to_string()),
            consecutive_hits: hits,
        };
        warn!(
            reason,
            hits,
            wait_s = wait_ms / 1_000,
            "rate limit hit, pausing dispatch"
        );
        inner.store.set_rate_limit(state.clone())?;
        let _ = inner.tx.send(state.clone());
        Ok(state)
    }

    /// A probe came back clean: resume dispatch.
    pub fn probe_succeeded(&self) -> Result<(), EngineError> {
        let inner = self.inner.lock();
        if inner.tx.borrow().available {
            return Ok(());
        }
        info!("rate limit lifted, resuming dispatch");
        let state = RateLimitState::default();
        inner.store.set_rate_limit(state.clone())?;
        let _ = inner.tx.send(state);
        Ok(())
    }

    /// A probe failed: push `resume_at` out by one more backoff step.
    ///
    /// Probe failures never touch tasks and do not count as hits.
    pub fn probe_failed(&self) -> Result<(), EngineError> {
        let inner = self.inner.lock();
        let previous = inner.tx.borrow().clone();
        if previous.available {
            return Ok(());
        }
        let wait_ms = backoff_ms(
            inner.base_ms,
            inner.multiplier,
            inner.max_ms,
            previous.consecutive_hits,
        );
        let state = RateLimitState {
            resume_at_ms: Some(self.clock.epoch_ms() + wait_ms),
            ..previous
        };
        warn!(wait_s = wait_ms / 1_000, "probe failed, extending backoff");
        inner.store.set_rate_limit(state.clone())?;
        let _ = inner.tx.send(state);
        Ok(())
    }

    /// Whether a probe is due: unavailable and past `resume_at`.
    pub fn probe_due(&self) -> bool {
        let state = self.rx.borrow();
        !state.available
            && state
                .resume_at_ms
                .map(|at| self.clock.epoch_ms() >= at)
                .unwrap_or(true)
    }
}

/// `base · multiplier^(hits-1)`, clamped to `[base, max]`.
fn backoff_ms(base_ms: u64, multiplier: f64, max_ms: u64, hits: u32) -> u64 {
    let exponent = hits.saturating_sub(1).min(32);
    let scaled = base_ms as f64 * multiplier.powi(exponent as i32);
    (scaled as u64).clamp(base_ms, max_ms.max(base_ms))
}

#[cfg(test)]
#[path = "arbiter_tests.rs"]
mod tests;
