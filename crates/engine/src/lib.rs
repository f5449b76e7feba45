// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taskd-engine: the task orchestration core.
//!
//! Couples the store, security gate, rate-limit arbiter, worker pool,
//! recovery loop, and orchestrator. Workers propose outcomes on a
//! channel; the orchestrator disposes by driving the state machine.

pub mod alerts;
pub mod arbiter;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod paths;
pub mod recovery;
pub mod resume;
pub mod submit;
pub mod worker;

pub use alerts::AlertSink;
pub use arbiter::Arbiter;
pub use dispatch::DispatchGate;
pub use error::EngineError;
pub use metrics::Metrics;
pub use orchestrator::Orchestrator;
pub use paths::StatePaths;
pub use recovery::Recovery;
pub use submit::{release_held, submit_scanned};
pub use worker::{TaskControls, WorkerDeps, WorkerPool};
