// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized ledger built from WAL replay.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskd_core::{
    Event, RateLimitState, ScheduleRecord, SecurityFinding, Task, TaskState, WorkerMeta,
};
use tracing::warn;

/// Materialized state built from applying events in sequence.
///
/// Every mutation is an [`Event`]; `apply_event` must stay a pure
/// function of `(ledger, event)` so replay after a crash reproduces the
/// exact pre-crash state. Events that no longer match the current state
/// (stale CAS losers during replay of a rotated WAL) are no-ops.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub tasks: HashMap<String, Task>,
    pub workers: HashMap<String, WorkerMeta>,
    #[serde(default)]
    pub rate_limit: RateLimitState,
    #[serde(default)]
    pub schedules: HashMap<String, ScheduleRecord>,
    #[serde(default)]
    pub findings: Vec<SecurityFinding>,
    /// dedup-key hash → task id, for idempotent submission.
    #[serde(default)]
    pub dedup_index: HashMap<String, String>,
}

impl Ledger {
    /// Get a task by ID or unique prefix (like git commit hashes).
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        if let Some(task) = self.tasks.get(id) {
            return Some(task);
        }

        let matches: Vec<_> = self
            .tasks
            .iter()
            .filter(|(k, _)| k.starts_with(id))
            .collect();

        // Only return if exactly one match (unambiguous)
        if matches.len() == 1 {
            Some(matches[0].1)
        } else {
            None
        }
    }

    /// Count tasks per state, for metrics and status output.
    pub fn counts_by_state(&self) -> HashMap<TaskState, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.values() {
            *counts.entry(task.state).or_insert(0) += 1;
        }
        counts
    }

    /// Findings recorded for one task.
    pub fn findings_for(&self, task_id: &str) -> Vec<&SecurityFinding> {
        self.findings
            .iter()
            .filter(|f| f.task_id.as_str() == task_id)
            .collect()
    }

    /// Apply an event to the ledger.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::TaskSubmitted { task } => {
                if let Some(key) = &task.dedup_key {
                    self.dedup_index
                        .insert(key.clone(), task.id.as_str().to_string());
                }
                self.tasks.insert(task.id.as_str().to_string(), task.clone());
            }

            Event::TaskClaimed {
                id,
                worker_id,
                claim_token,
                at_ms,
            } => {
                if let Some(task) = self.tasks.get_mut(id.as_str()) {
                    if task.state != TaskState::Pending {
                        warn!(task_id = %id, state = %task.state, "stale claim event, ignoring");
                        return;
                    }
                    task.state = TaskState::Processing;
                    task.worker_id = Some(worker_id.clone());
                    task.claim_token = claim_token.clone();
                    task.attempt_count += 1;
                    task.started_at_ms = Some(*at_ms);
                    task.heartbeat_at_ms = Some(*at_ms);
                    task.updated_at_ms = *at_ms;
                    task.failure_kind = None;
                    task.last_error = None;
                    task.backoff_until_ms = None;
                    task.pid = None;
                    // Fresh attempt: the tail is append-only within one
                    // attempt only.
                    task.output_tail.reset();
                }
            }

            Event::TaskPatched { id, patch } => {
                if let Some(task) = self.tasks.get_mut(id.as_str()) {
                    if let Some(at) = patch.heartbeat_at_ms {
                        task.heartbeat_at_ms = Some(at);
                        task.updated_at_ms = at;
                    }
                    if let Some(text) = &patch.output_append {
                        task.output_tail.append(text);
                    }
                    if let Some(blob) = &patch.resume_blob {
                        task.resume_blob = Some(blob.clone());
                    }
                    if let Some(verdict) = patch.security_verdict {
                        task.security_verdict = verdict;
                    }
                    if let Some(pid) = patch.pid {
                        task.pid = Some(pid);
                    }
                }
            }

            Event::TaskTransitioned {
                id,
                from,
                to,
                at_ms,
                patch,
            } => {
                if let Some(task) = self.tasks.get_mut(id.as_str()) {
                    if task.state != *from {
                        warn!(
                            task_id = %id,
                            state = %task.state,
                            from = %from,
                            to = %to,
                            "stale transition event, ignoring"
                        );
                        return;
                    }
                    task.state = *to;
                    task.updated_at_ms = *at_ms;
                    if let Some(kind) = patch.failure_kind {
                        task.failure_kind = Some(kind);
                    }
                    if let Some(error) = &patch.error {
                        task.last_error = Some(error.clone());
                    }
                    task.backoff_until_ms = patch.backoff_until_ms;
                    if let Some(token) = &patch.rotate_claim_token {
                        task.claim_token = token.clone();
                    }
                    if patch.clear_worker || to.is_terminal() {
                        task.worker_id = None;
                        task.pid = None;
                    }
                    if patch.reset_output {
                        task.output_tail.reset();
                    }
                    if let Some(verdict) = patch.security_verdict {
                        task.security_verdict = verdict;
                    }
                    if patch.refund_attempt {
                        task.attempt_count = task.attempt_count.saturating_sub(1);
                    }
                    if to.is_terminal() {
                        task.ended_at_ms = Some(*at_ms);
                    }
                }
            }

            Event::TaskDeleted { id } => {
                if let Some(task) = self.tasks.remove(id.as_str()) {
                    if let Some(key) = &task.dedup_key {
                        self.dedup_index.remove(key);
                    }
                    self.findings.retain(|f| f.task_id != task.id);
                }
            }

            Event::WorkerStarted { id, pid, at_ms } => {
                self.workers.insert(
                    id.as_str().to_string(),
                    WorkerMeta {
                        id: id.clone(),
                        pid: *pid,
                        started_at_ms: *at_ms,
                        heartbeat_at_ms: *at_ms,
                        current_task_id: None,
                        stopped: false,
                    },
                );
            }

            Event::WorkerHeartbeat { id, task_id, at_ms } => {
                if let Some(worker) = self.workers.get_mut(id.as_str()) {
                    worker.heartbeat_at_ms = *at_ms;
                    worker.current_task_id = task_id.clone();
                }
                if let Some(task_id) = task_id {
                    if let Some(task) = self.tasks.get_mut(task_id.as_str()) {
                        task.heartbeat_at_ms = Some(*at_ms);
                    }
                }
            }

            Event::WorkerStopped { id } => {
                if let Some(worker) = self.workers.get_mut(id.as_str()) {
                    worker.stopped = true;
                    worker.current_task_id = None;
                }
            }

            Event::RateLimitChanged { state } => {
                self.rate_limit = state.clone();
            }

            Event::FindingRecorded { finding } => {
                self.findings.push(finding.clone());
            }

            Event::ScheduleAdded { schedule } => {
                self.schedules
                    .insert(schedule.id.as_str().to_string(), schedule.clone());
            }

            Event::ScheduleRemoved { id } => {
                self.schedules.remove(id.as_str());
            }

            Event::ScheduleEnabled { id, enabled } => {
                if let Some(schedule) = self.schedules.get_mut(id.as_str()) {
                    schedule.enabled = *enabled;
                }
            }

            Event::ScheduleFired { id, task_id: _, at_ms } => {
                if let Some(schedule) = self.schedules.get_mut(id.as_str()) {
                    schedule.last_fired_at_ms = Some(*at_ms);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
