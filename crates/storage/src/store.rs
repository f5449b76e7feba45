// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable task store: single source of truth.
//!
//! Every operation takes the inner mutex, validates against the ledger,
//! appends the resulting events to the WAL, fsyncs, and applies them.
//! One mutex region per mutation gives the serialized atomic
//! transitions the rest of the system relies on.

use crate::{Ledger, Snapshot, SnapshotError, Wal, WalError};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use taskd_core::{
    Clock, Event, IdGen, RateLimitState, ScheduleId, ScheduleRecord, SecurityFinding, Task,
    TaskClass, TaskId, TaskPatch, TaskSpec, TaskState, TransitionPatch, UuidIdGen, WorkerId,
    WorkerMeta,
};
use thiserror::Error;
use tracing::info;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("stale claim for task {0}")]
    StaleClaim(String),
    #[error("illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },
    #[error("task {task_id} is {state}, expected one of {expected}")]
    NotInFromSet {
        task_id: String,
        state: TaskState,
        expected: String,
    },
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),
    #[error("invalid submission: {0}")]
    InvalidSpec(String),
}

/// Predicate a worker presents when claiming.
#[derive(Debug, Clone)]
pub struct ClaimFilter {
    /// Classes the worker may run right now (per-class caps applied by
    /// the dispatch gate before the claim).
    pub classes: Vec<TaskClass>,
}

impl ClaimFilter {
    pub fn all() -> Self {
        Self {
            classes: TaskClass::all().to_vec(),
        }
    }

    pub fn accepts(&self, task: &Task) -> bool {
        self.classes.contains(&task.class)
    }
}

struct StoreInner {
    wal: Wal,
    ledger: Ledger,
}

/// Durable task ledger + queue.
///
/// Cheap to clone; all clones share the same serialized inner state.
pub struct Store<C: Clock, G: IdGen = UuidIdGen> {
    inner: Arc<Mutex<StoreInner>>,
    clock: C,
    ids: G,
    default_max_attempts: u32,
}

impl<C: Clock, G: IdGen> Clone for Store<C, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            clock: self.clock.clone(),
            ids: self.ids.clone(),
            default_max_attempts: self.default_max_attempts,
        }
    }
}

impl<C: Clock, G: IdGen> Store<C, G> {
    /// Open the store: load the newest snapshot and replay the WAL tail.
    pub fn open(
        wal_path: &Path,
        snapshot_path: &Path,
        clock: C,
        ids: G,
        default_max_attempts: u32,
    ) -> Result<Self, StoreError> {
        let (mut ledger, snapshot_seq) = match Snapshot::load(snapshot_path)? {
            Some(snapshot) => (snapshot.ledger, snapshot.seq),
            None => (Ledger::default(), 0),
        };

        let wal = Wal::open(wal_path, snapshot_seq)?;

        let entries = wal.entries_after(snapshot_seq)?;
        let replayed = entries.len();
        for entry in entries {
            ledger.apply_event(&entry.event);
        }
        if replayed > 0 || snapshot_seq > 0 {
            info!(snapshot_seq, replayed, "store recovered");
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner { wal, ledger })),
            clock,
            ids,
            default_max_attempts,
        })
    }

    /// Append events, fsync, and apply them. The one mutation path.
    fn commit(&self, inner: &mut StoreInner, events: &[Event]) -> Result<(), StoreError> {
        for event in events {
            inner.wal.append(event)?;
        }
        inner.wal.flush()?;
        for event in events {
            inner.ledger.apply_event(event);
        }
        Ok(())
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Insert a new pending task. Idempotent on the submission's dedup
    /// key: while the original task is live, resubmission returns its id.
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskId, StoreError> {
        self.submit_inner(spec, false)
    }

    /// Insert a task held for operator review (security gate refusal).
    ///
    /// The task starts in `needs_human_review` and never enters the
    /// pending queue until an operator releases it.
    pub fn submit_held(&self, spec: TaskSpec) -> Result<TaskId, StoreError> {
        self.submit_inner(spec, true)
    }

    fn submit_inner(&self, mut spec: TaskSpec, held: bool) -> Result<TaskId, StoreError> {
        spec.validate().map_err(StoreError::InvalidSpec)?;
        let mut inner = self.inner.lock();

        if let Some(key) = &spec.dedup_key {
            let hashed = hash_dedup_key(key);
            if let Some(existing) = inner.ledger.dedup_index.get(&hashed) {
                if let Some(task) = inner.ledger.tasks.get(existing) {
                    if !task.is_terminal() {
                        return Ok(task.id.clone());
                    }
                }
            }
            spec.dedup_key = Some(hashed);
        }

        let id = TaskId::new(self.ids.next());
        let mut task = Task::from_spec_at(
            id.clone(),
            spec,
            self.default_max_attempts,
            self.clock.epoch_ms(),
        );
        if held {
            task.state = TaskState::NeedsHumanReview;
            task.security_verdict = taskd_core::SecurityVerdict::Blocked;
            task.failure_kind = Some(taskd_core::FailureKind::SecurityBlock);
        }
        self.commit(&mut inner, &[Event::TaskSubmitted { task }])?;
        Ok(id)
    }

    /// Submit on behalf of a schedule, stamping the firing on the record.
    pub fn submit_from_schedule(&self, schedule_id: &ScheduleId) -> Result<TaskId, StoreError> {
        let mut inner = self.inner.lock();
        let schedule = inner
            .ledger
            .schedules
            .get(schedule_id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::ScheduleNotFound(schedule_id.to_string()))?;

        let at_ms = self.clock.epoch_ms();
        let id = TaskId::new(self.ids.next());
        let mut task = Task::from_spec_at(id.clone(), schedule.to_spec(), self.default_max_attempts, at_ms);
        task.schedule_id = Some(schedule_id.clone());

        self.commit(
            &mut inner,
            &[
                Event::TaskSubmitted { task },
                Event::ScheduleFired {
                    id: schedule_id.clone(),
                    task_id: id.clone(),
                    at_ms,
                },
            ],
        )?;
        Ok(id)
    }

    // ── Claim & fenced updates ───────────────────────────────────────────

    /// Atomically select the best pending task matching the filter,
    /// transition it to processing, and rotate its claim token.
    ///
    /// Ordering: priority descending, created_at ascending, id ascending.
    pub fn claim(
        &self,
        worker_id: &WorkerId,
        filter: &ClaimFilter,
    ) -> Result<Option<(Task, String)>, StoreError> {
        let mut inner = self.inner.lock();

        let best = inner
            .ledger
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Pending && filter.accepts(t))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at_ms.cmp(&b.created_at_ms))
                    .then(a.id.cmp(&b.id))
            })
            .map(|t| t.id.clone());

        let Some(id) = best else {
            return Ok(None);
        };

        let claim_token = self.ids.next();
        self.commit(
            &mut inner,
            &[Event::TaskClaimed {
                id: id.clone(),
                worker_id: worker_id.clone(),
                claim_token: claim_token.clone(),
                at_ms: self.clock.epoch_ms(),
            }],
        )?;

        let task = inner
            .ledger
            .tasks
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
        Ok(Some((task, claim_token)))
    }

    /// Apply a worker-side patch, fenced by the claim token.
    pub fn update_by_token(
        &self,
        task_id: &TaskId,
        claim_token: &str,
        patch: TaskPatch,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let task = inner
            .ledger
            .tasks
            .get(task_id.as_str())
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;

        if task.claim_token != claim_token {
            return Err(StoreError::StaleClaim(task_id.to_string()));
        }

        self.commit(
            &mut inner,
            &[Event::TaskPatched {
                id: task_id.clone(),
                patch,
            }],
        )
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// Compare-and-set state transition.
    ///
    /// Rejects when the current state is outside `from_set` or the edge
    /// is not part of the state machine. Transitions into terminal
    /// states clear the claim and stamp `ended_at`.
    pub fn transition(
        &self,
        task_id: &TaskId,
        from_set: &[TaskState],
        to: TaskState,
        patch: TransitionPatch,
    ) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock();
        self.transition_locked(&mut inner, task_id, from_set, to, patch)
    }

    fn transition_locked(
        &self,
        inner: &mut StoreInner,
        task_id: &TaskId,
        from_set: &[TaskState],
        to: TaskState,
        patch: TransitionPatch,
    ) -> Result<Task, StoreError> {
        let task = inner
            .ledger
            .tasks
            .get(task_id.as_str())
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        let from = task.state;

        if !from_set.contains(&from) {
            return Err(StoreError::NotInFromSet {
                task_id: task_id.to_string(),
                state: from,
                expected: from_set
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join("|"),
            });
        }
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                task_id: task_id.to_string(),
                from,
                to,
            });
        }

        self.commit(
            inner,
            &[Event::TaskTransitioned {
                id: task_id.clone(),
                from,
                to,
                at_ms: self.clock.epoch_ms(),
                patch,
            }],
        )?;

        inner
            .ledger
            .tasks
            .get(task_id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }

    /// Cancel a non-terminal task.
    ///
    /// Rotates the claim token so the holding worker is fenced out, and
    /// returns the state the task was in so the caller can signal the
    /// subprocess when it was running.
    pub fn cancel(&self, task_id: &TaskId) -> Result<(TaskState, Option<u32>), StoreError> {
        let mut inner = self.inner.lock();
        let task = inner
            .ledger
            .tasks
            .get(task_id.as_str())
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        let prior = task.state;
        let pid = task.pid;

        if prior.is_terminal() {
            return Err(StoreError::IllegalTransition {
                task_id: task_id.to_string(),
                from: prior,
                to: TaskState::Cancelled,
            });
        }

        self.transition_locked(
            &mut inner,
            task_id,
            &[prior],
            TaskState::Cancelled,
            TransitionPatch {
                failure_kind: Some(taskd_core::FailureKind::Cancelled),
                rotate_claim_token: Some(self.ids.next()),
                clear_worker: true,
                ..Default::default()
            },
        )?;
        Ok((prior, pid))
    }

    // ── Workers ──────────────────────────────────────────────────────────

    pub fn register_worker(&self, worker_id: &WorkerId, pid: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(
            &mut inner,
            &[Event::WorkerStarted {
                id: worker_id.clone(),
                pid,
                at_ms: self.clock.epoch_ms(),
            }],
        )
    }

    /// Update worker liveness and, when present, the task's heartbeat.
    pub fn heartbeat(
        &self,
        worker_id: &WorkerId,
        task_id: Option<&TaskId>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(
            &mut inner,
            &[Event::WorkerHeartbeat {
                id: worker_id.clone(),
                task_id: task_id.cloned(),
                at_ms: self.clock.epoch_ms(),
            }],
        )
    }

    pub fn worker_stopped(&self, worker_id: &WorkerId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(
            &mut inner,
            &[Event::WorkerStopped {
                id: worker_id.clone(),
            }],
        )
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Read-only scan for the recovery loop and queries.
    pub fn sweep(&self, predicate: impl Fn(&Task) -> bool) -> Vec<Task> {
        let inner = self.inner.lock();
        inner
            .ledger
            .tasks
            .values()
            .filter(|t| predicate(t))
            .cloned()
            .collect()
    }

    pub fn get_task(&self, id_or_prefix: &str) -> Option<Task> {
        let inner = self.inner.lock();
        inner.ledger.get_task(id_or_prefix).cloned()
    }

    pub fn workers(&self) -> Vec<WorkerMeta> {
        let inner = self.inner.lock();
        inner.ledger.workers.values().cloned().collect()
    }

    pub fn counts_by_state(&self) -> std::collections::HashMap<TaskState, usize> {
        let inner = self.inner.lock();
        inner.ledger.counts_by_state()
    }

    pub fn findings_for(&self, task_id: &TaskId) -> Vec<SecurityFinding> {
        let inner = self.inner.lock();
        inner
            .ledger
            .findings_for(task_id.as_str())
            .into_iter()
            .cloned()
            .collect()
    }

    // ── Rate limit & findings ────────────────────────────────────────────

    pub fn rate_limit(&self) -> RateLimitState {
        let inner = self.inner.lock();
        inner.ledger.rate_limit.clone()
    }

    pub fn set_rate_limit(&self, state: RateLimitState) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(&mut inner, &[Event::RateLimitChanged { state }])
    }

    pub fn record_finding(&self, finding: SecurityFinding) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(&mut inner, &[Event::FindingRecorded { finding }])
    }

    // ── Schedules ────────────────────────────────────────────────────────

    pub fn add_schedule(&self, schedule: ScheduleRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(&mut inner, &[Event::ScheduleAdded { schedule }])
    }

    pub fn remove_schedule(&self, id: &ScheduleId) -> Result<ScheduleRecord, StoreError> {
        let mut inner = self.inner.lock();
        let schedule = inner
            .ledger
            .schedules
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::ScheduleNotFound(id.to_string()))?;
        self.commit(&mut inner, &[Event::ScheduleRemoved { id: id.clone() }])?;
        Ok(schedule)
    }

    pub fn set_schedule_enabled(
        &self,
        id: &ScheduleId,
        enabled: bool,
    ) -> Result<ScheduleRecord, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.ledger.schedules.contains_key(id.as_str()) {
            return Err(StoreError::ScheduleNotFound(id.to_string()));
        }
        self.commit(
            &mut inner,
            &[Event::ScheduleEnabled {
                id: id.clone(),
                enabled,
            }],
        )?;
        inner
            .ledger
            .schedules
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::ScheduleNotFound(id.to_string()))
    }

    pub fn schedules(&self) -> Vec<ScheduleRecord> {
        let inner = self.inner.lock();
        let mut schedules: Vec<_> = inner.ledger.schedules.values().cloned().collect();
        schedules.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        schedules
    }

    // ── Retention & checkpointing ────────────────────────────────────────

    /// Delete terminal tasks past the grace period. Returns removed ids.
    pub fn purge_terminal(&self, grace_ms: u64) -> Result<Vec<TaskId>, StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let expired: Vec<TaskId> = inner
            .ledger
            .tasks
            .values()
            .filter(|t| {
                t.is_terminal()
                    && t.ended_at_ms
                        .map(|end| end.saturating_add(grace_ms) <= now)
                        .unwrap_or(false)
            })
            .map(|t| t.id.clone())
            .collect();

        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let events: Vec<Event> = expired
            .iter()
            .map(|id| Event::TaskDeleted { id: id.clone() })
            .collect();
        self.commit(&mut inner, &events)?;
        Ok(expired)
    }

    /// Snapshot input for the checkpointer: current seq + ledger clone.
    pub fn checkpoint_state(&self) -> (u64, Ledger) {
        let inner = self.inner.lock();
        (inner.wal.write_seq(), inner.ledger.clone())
    }

    /// Truncate WAL entries covered by a durable snapshot.
    pub fn truncate_wal(&self, through_seq: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.wal.truncate_through(through_seq)?;
        Ok(())
    }
}

fn hash_dedup_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
