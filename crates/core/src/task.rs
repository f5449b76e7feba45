// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task entity and state machine.

use crate::clock::Clock;
use crate::finding::SecurityVerdict;
use crate::output_ring::OutputRing;
use crate::resume::ResumeBlob;
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

crate::define_id! {
    /// Unique identifier for a task.
    ///
    /// Assigned at submission and stable for the task's whole lifetime,
    /// including across retries and worker changes.
    #[derive(Default)]
    pub struct TaskId;
}

/// Complexity tier of a task.
///
/// The class decides the agent tool allow-list, the wall-clock timeout,
/// and the resume strategy used when an attempt is interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskClass {
    /// Small, restartable work. Retries re-run from scratch.
    #[serde(rename = "lightweight")]
    Light,
    /// Work that benefits from prior output as context on retry.
    #[serde(rename = "medium_context")]
    Medium,
    /// Long chunked work resumed from the first unfinished chunk.
    #[serde(rename = "heavy_context")]
    Heavy,
}

impl TaskClass {
    pub fn all() -> [TaskClass; 3] {
        [TaskClass::Light, TaskClass::Medium, TaskClass::Heavy]
    }

    /// Wire name as accepted on the submission surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskClass::Light => "lightweight",
            TaskClass::Medium => "medium_context",
            TaskClass::Heavy => "heavy_context",
        }
    }
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lightweight" | "light" => Ok(TaskClass::Light),
            "medium_context" | "medium" => Ok(TaskClass::Medium),
            "heavy_context" | "heavy" => Ok(TaskClass::Heavy),
            other => Err(format!("unknown task class: {}", other)),
        }
    }
}

/// Dispatch priority. Ordering is `Low < Normal < High < Urgent`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Task lifecycle state.
///
/// Terminal states (`Completed`, `Failed`, `Cancelled`) are absorbing:
/// the store rejects every transition out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Processing,
    /// Operator-initiated pause. The owning worker keeps its claim.
    Paused,
    /// Suspended by a rate-limit hit until the arbiter resumes.
    WaitingUnban,
    /// Failed attempt waiting out its backoff before re-queueing.
    Retrying,
    /// Held for an operator decision after a security verdict.
    NeedsHumanReview,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether `self → to` is a legal edge of the state machine.
    ///
    /// `Cancelled` is reachable from any non-terminal state. The
    /// `Processing → Pending` edge is reserved for recovery un-claims.
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        use TaskState::*;
        if self.is_terminal() {
            return false;
        }
        if to == Cancelled {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Paused)
                | (Processing, WaitingUnban)
                | (Processing, Retrying)
                | (Processing, NeedsHumanReview)
                | (Processing, Pending)
                | (Paused, Processing)
                | (WaitingUnban, Retrying)
                | (Retrying, Pending)
                | (NeedsHumanReview, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing => "processing",
            TaskState::Paused => "paused",
            TaskState::WaitingUnban => "waiting_unban",
            TaskState::Retrying => "retrying",
            TaskState::NeedsHumanReview => "needs_human_review",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    pub fn all() -> [TaskState; 9] {
        use TaskState::*;
        [
            Pending,
            Processing,
            Paused,
            WaitingUnban,
            Retrying,
            NeedsHumanReview,
            Completed,
            Failed,
            Cancelled,
        ]
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure classification attached to failure-ish states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Agent service rate limit. Does not consume an attempt.
    RateLimited,
    Network,
    /// Disk/memory/permission pressure. Halts dispatch globally.
    Resource,
    /// Timeout or heartbeat miss.
    ProcessHang,
    /// Non-zero exit not otherwise classified.
    ProcessCrash,
    SecurityBlock,
    /// Attempts exceeded. Terminal.
    Exhausted,
    Cancelled,
    /// Invariant violation. Terminal, alerts at P1.
    Internal,
}

impl FailureKind {
    /// Whether a failure of this kind is eligible for automatic retry.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FailureKind::Network | FailureKind::ProcessHang | FailureKind::ProcessCrash
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Network => "network",
            FailureKind::Resource => "resource",
            FailureKind::ProcessHang => "process_hang",
            FailureKind::ProcessCrash => "process_crash",
            FailureKind::SecurityBlock => "security_block",
            FailureKind::Exhausted => "exhausted",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Submission payload accepted from the CLI and the cron submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub description: String,
    pub class: TaskClass,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Client-supplied idempotency key. Resubmitting the same key while
    /// the original task is live returns the original task id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl TaskSpec {
    /// Validate submission fields. Returns a human-readable reason on rejection.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("task name must not be empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Err("task description must not be empty".to_string());
        }
        if let Some(0) = self.max_attempts {
            return Err("max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Render the agent CLI prompt for a submission.
///
/// The command is derived once at submission and stays stable; retries
/// layer class-specific resume context on top of it instead of
/// regenerating it.
pub fn render_command(description: &str, class: TaskClass) -> String {
    match class {
        TaskClass::Light => description.trim().to_string(),
        TaskClass::Medium => format!(
            "{}\n\nWork the task to completion and print a final summary line.",
            description.trim()
        ),
        TaskClass::Heavy => format!(
            "{}\n\nBreak the work into numbered chunks, announce each chunk as \
             `chunk <n>: <title>` before starting it, and print `chunk <n>: done` \
             after finishing it.",
            description.trim()
        ),
    }
}

/// The central entity: one unit of work moving through the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    /// Prompt handed to the agent CLI, derived from description + class.
    pub command: String,
    pub class: TaskClass,
    pub priority: Priority,
    pub state: TaskState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    /// Holder of the current claim. Non-null iff state ∈ {processing, paused}.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    /// Fencing token rotated on every claim. Worker-side updates must
    /// present the token they were issued at claim time.
    pub claim_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at_ms: Option<u64>,
    /// Masked tail of the current attempt's output, bounded, reset on retry.
    #[serde(default)]
    pub output_tail: OutputRing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_blob: Option<ResumeBlob>,
    #[serde(default)]
    pub security_verdict: SecurityVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Earliest epoch-ms at which a retrying task may go back to pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_until_ms: Option<u64>,
    /// Pid of the currently running agent subprocess, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    /// Schedule that submitted this task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<crate::schedule::ScheduleId>,
}

impl Task {
    /// Build a new pending task from a submission.
    pub fn from_spec(
        id: TaskId,
        spec: TaskSpec,
        default_max_attempts: u32,
        clock: &impl Clock,
    ) -> Self {
        Self::from_spec_at(id, spec, default_max_attempts, clock.epoch_ms())
    }

    /// Build with an explicit timestamp (for WAL replay).
    pub fn from_spec_at(id: TaskId, spec: TaskSpec, default_max_attempts: u32, at_ms: u64) -> Self {
        let command = render_command(&spec.description, spec.class);
        Self {
            id,
            name: spec.name,
            description: spec.description,
            command,
            class: spec.class,
            priority: spec.priority,
            state: TaskState::Pending,
            attempt_count: 0,
            max_attempts: spec.max_attempts.unwrap_or(default_max_attempts),
            created_at_ms: at_ms,
            updated_at_ms: at_ms,
            started_at_ms: None,
            ended_at_ms: None,
            worker_id: None,
            claim_token: String::new(),
            heartbeat_at_ms: None,
            output_tail: OutputRing::default(),
            resume_blob: None,
            security_verdict: SecurityVerdict::Unscanned,
            failure_kind: None,
            last_error: None,
            backoff_until_ms: None,
            pid: None,
            working_dir: spec.working_dir,
            dedup_key: spec.dedup_key,
            schedule_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether another attempt may be started after a retriable failure.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
