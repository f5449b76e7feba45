// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types persisted to the write-ahead log.
//!
//! Every store mutation is an event; the ledger is rebuilt by replaying
//! them over the newest snapshot. Serializes with
//! `{"type": "domain:name", ...fields}` format.

use crate::finding::{SecurityFinding, SecurityVerdict};
use crate::id::ShortId;
use crate::rate_limit::RateLimitState;
use crate::resume::ResumeBlob;
use crate::schedule::{ScheduleId, ScheduleRecord};
use crate::task::{FailureKind, Task, TaskId, TaskState};
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};

/// Fenced worker-side mutation of a claimed task.
///
/// Only fields a running worker is allowed to touch; applied through
/// `UpdateByToken` so a stale claim can never write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at_ms: Option<u64>,
    /// Masked output appended to the task's tail ring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_append: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_blob: Option<ResumeBlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_verdict: Option<SecurityVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Mutation applied together with a state transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_until_ms: Option<u64>,
    /// New claim token, when the transition fences out the holder
    /// (cancellation, recovery un-claim).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate_claim_token: Option<String>,
    /// Release the claim (worker_id and pid cleared).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clear_worker: bool,
    /// Reset the output ring for a fresh attempt.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reset_output: bool,
    /// Override the scan verdict (operator release of a held task).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_verdict: Option<SecurityVerdict>,
    /// Refund the attempt consumed at claim time (rate-limit hits).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub refund_attempt: bool,
}

/// Events that mutate the ledger.
///
/// Unknown fields are tolerated on read so old WALs replay across
/// version bumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- task --
    #[serde(rename = "task:submitted")]
    TaskSubmitted { task: Task },

    #[serde(rename = "task:claimed")]
    TaskClaimed {
        id: TaskId,
        worker_id: WorkerId,
        claim_token: String,
        at_ms: u64,
    },

    #[serde(rename = "task:patched")]
    TaskPatched { id: TaskId, patch: TaskPatch },

    #[serde(rename = "task:transitioned")]
    TaskTransitioned {
        id: TaskId,
        from: TaskState,
        to: TaskState,
        at_ms: u64,
        #[serde(default)]
        patch: TransitionPatch,
    },

    /// Retention sweep removal, past the terminal grace period.
    #[serde(rename = "task:deleted")]
    TaskDeleted { id: TaskId },

    // -- worker --
    #[serde(rename = "worker:started")]
    WorkerStarted { id: WorkerId, pid: u32, at_ms: u64 },

    #[serde(rename = "worker:heartbeat")]
    WorkerHeartbeat {
        id: WorkerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        at_ms: u64,
    },

    #[serde(rename = "worker:stopped")]
    WorkerStopped { id: WorkerId },

    // -- rate limit --
    #[serde(rename = "ratelimit:changed")]
    RateLimitChanged { state: RateLimitState },

    // -- security --
    #[serde(rename = "security:finding")]
    FindingRecorded { finding: SecurityFinding },

    // -- schedule --
    #[serde(rename = "schedule:added")]
    ScheduleAdded { schedule: ScheduleRecord },

    #[serde(rename = "schedule:removed")]
    ScheduleRemoved { id: ScheduleId },

    #[serde(rename = "schedule:enabled")]
    ScheduleEnabled { id: ScheduleId, enabled: bool },

    #[serde(rename = "schedule:fired")]
    ScheduleFired {
        id: ScheduleId,
        task_id: TaskId,
        at_ms: u64,
    },
}

impl Event {
    /// Task this event touches, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskSubmitted { task } => Some(&task.id),
            Event::TaskClaimed { id, .. }
            | Event::TaskPatched { id, .. }
            | Event::TaskTransitioned { id, .. }
            | Event::TaskDeleted { id } => Some(id),
            Event::WorkerHeartbeat { task_id, .. } => task_id.as_ref(),
            Event::FindingRecorded { finding } => Some(&finding.task_id),
            Event::ScheduleFired { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// One-line summary for tracing spans.
    pub fn log_summary(&self) -> String {
        match self {
            Event::TaskSubmitted { task } => {
                format!("task:submitted {} ({})", task.id.short(8), task.class)
            }
            Event::TaskClaimed { id, worker_id, .. } => {
                format!("task:claimed {} by {}", id.short(8), worker_id.short(8))
            }
            Event::TaskPatched { id, .. } => format!("task:patched {}", id.short(8)),
            Event::TaskTransitioned { id, from, to, .. } => {
                format!("task:transitioned {} {} -> {}", id.short(8), from, to)
            }
            Event::TaskDeleted { id } => format!("task:deleted {}", id.short(8)),
            Event::WorkerStarted { id, pid, .. } => {
                format!("worker:started {} (pid {})", id.short(8), pid)
            }
            Event::WorkerHeartbeat { id, .. } => format!("worker:heartbeat {}", id.short(8)),
            Event::WorkerStopped { id } => format!("worker:stopped {}", id.short(8)),
            Event::RateLimitChanged { state } => format!(
                "ratelimit:changed available={} hits={}",
                state.available, state.consecutive_hits
            ),
            Event::FindingRecorded { finding } => {
                format!(
                    "security:finding {} {}",
                    finding.task_id.short(8),
                    finding.kind
                )
            }
            Event::ScheduleAdded { schedule } => {
                format!("schedule:added {} ({})", schedule.id.short(8), schedule.name)
            }
            Event::ScheduleRemoved { id } => format!("schedule:removed {}", id.short(8)),
            Event::ScheduleEnabled { id, enabled } => {
                format!("schedule:enabled {} {}", id.short(8), enabled)
            }
            Event::ScheduleFired { id, task_id, .. } => {
                format!("schedule:fired {} -> {}", id.short(8), task_id.short(8))
            }
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
