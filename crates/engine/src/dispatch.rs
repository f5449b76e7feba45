// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch gating: what may a worker claim right now?

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use taskd_core::{ClassCaps, Clock, Config, IdGen, TaskClass, TaskState};
use taskd_storage::{ClaimFilter, Store};

/// Combines the dispatch preconditions: arbiter availability is checked
/// by the worker itself; this gate adds resource pressure and per-class
/// concurrency caps.
#[derive(Clone)]
pub struct DispatchGate {
    resource_halted: Arc<AtomicBool>,
    caps: ClassCaps,
}

impl DispatchGate {
    pub fn new(config: &Config) -> Self {
        Self {
            resource_halted: Arc::new(AtomicBool::new(false)),
            caps: config.class_concurrency_caps,
        }
    }

    /// Set by the recovery loop when disk or memory is below the floor.
    pub fn set_resource_halted(&self, halted: bool) {
        self.resource_halted.store(halted, Ordering::SeqCst);
    }

    pub fn is_resource_halted(&self) -> bool {
        self.resource_halted.load(Ordering::SeqCst)
    }

    /// The claim filter for the current instant, or `None` when no
    /// dispatch may happen at all.
    pub fn claim_filter<C: Clock, G: IdGen>(&self, store: &Store<C, G>) -> Option<ClaimFilter> {
        if self.is_resource_halted() {
            return None;
        }

        let running = store.sweep(|t| t.state == TaskState::Processing);
        let classes: Vec<TaskClass> = TaskClass::all()
            .into_iter()
            .filter(|class| match self.caps.for_class(*class) {
                Some(cap) => running.iter().filter(|t| t.class == *class).count() < cap,
                None => true,
            })
            .collect();

        if classes.is_empty() {
            None
        } else {
            Some(ClaimFilter { classes })
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
