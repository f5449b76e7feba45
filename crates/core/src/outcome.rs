// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker outcome reports.
//!
//! Workers never drive the state machine themselves; they propose an
//! outcome on a channel and the orchestrator disposes. This keeps the
//! worker ↔ orchestrator relationship acyclic.

use crate::finding::ScanVerdict;
use crate::task::{FailureKind, TaskId};
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};

/// Result of one task attempt, as observed by the owning worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Subprocess exited 0.
    Completed,
    /// Output matched a rate-limit signature; the subprocess was killed.
    RateLimited { signature: String },
    /// Command scan refused dispatch; no subprocess was spawned.
    SecurityBlocked { verdict: ScanVerdict },
    /// Attempt failed with a classified kind.
    Failed {
        kind: FailureKind,
        error: String,
    },
    /// The claim was cancelled out from under the worker.
    Cancelled,
}

/// Envelope carrying an outcome to the orchestrator.
///
/// The claim token lets the orchestrator discard reports from fenced-out
/// workers without consulting the worker again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub claim_token: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}
