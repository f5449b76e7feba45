// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator: drains worker outcomes and drives the state machine.
//!
//! Workers propose, the orchestrator disposes. Reports carrying a stale
//! claim token are discarded: whoever rotated the token (cancel,
//! recovery) already decided that task's fate.

use crate::alerts::{AlertLevel, AlertSink};
use crate::arbiter::Arbiter;
use crate::metrics::Metrics;
use std::sync::Arc;
use taskd_core::{
    Clock, Config, FailureKind, IdGen, Outcome, OutcomeReport, TaskState, TransitionPatch,
};
use taskd_storage::{Store, StoreError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Retry backoff ceiling; beyond this a retry gains nothing.
const MAX_RETRY_BACKOFF_SECS: u64 = 3_600;

/// Applies worker outcomes to the store and reacts to arbiter resume.
pub struct Orchestrator<C: Clock, G: IdGen> {
    store: Store<C, G>,
    arbiter: Arbiter<C, G>,
    metrics: Metrics,
    alerts: AlertSink,
    config: Arc<Config>,
    clock: C,
}

impl<C: Clock, G: IdGen> Clone for Orchestrator<C, G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            arbiter: self.arbiter.clone(),
            metrics: self.metrics.clone(),
            alerts: self.alerts.clone(),
            config: Arc::clone(&self.config),
            clock: self.clock.clone(),
        }
    }
}

impl<C: Clock, G: IdGen> Orchestrator<C, G> {
    pub fn new(
        store: Store<C, G>,
        arbiter: Arbiter<C, G>,
        metrics: Metrics,
        alerts: AlertSink,
        config: Arc<Config>,
        clock: C,
    ) -> Self {
        Self {
            store,
            arbiter,
            metrics,
            alerts,
            config,
            clock,
        }
    }

    /// Main loop: outcome channel + arbiter subscription.
    pub async fn run(
        self,
        mut outcomes: mpsc::Receiver<OutcomeReport>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut availability = self.arbiter.subscribe();
        loop {
            tokio::select! {
                maybe_report = outcomes.recv() => {
                    match maybe_report {
                        Some(report) => self.handle_report(report),
                        None => break, // all workers gone
                    }
                }
                result = availability.changed() => {
                    if result.is_err() {
                        break;
                    }
                    if availability.borrow().available {
                        self.on_arbiter_resume();
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Apply one worker report to the state machine.
    pub fn handle_report(&self, report: OutcomeReport) {
        let Some(task) = self.store.get_task(report.task_id.as_str()) else {
            debug!(task = %report.task_id, "report for unknown task, dropping");
            return;
        };
        if task.claim_token != report.claim_token {
            debug!(task = %report.task_id, "report with stale claim token, dropping");
            return;
        }

        match report.outcome {
            Outcome::Completed => {
                self.apply(
                    &report,
                    TaskState::Completed,
                    TransitionPatch::default(),
                    "completed",
                );
            }

            Outcome::RateLimited { ref signature } => {
                if let Err(e) = self.arbiter.record_hit(signature) {
                    warn!(error = %e, "failed to record rate-limit hit");
                }
                // The hit does not consume the attempt.
                self.apply(
                    &report,
                    TaskState::WaitingUnban,
                    TransitionPatch {
                        failure_kind: Some(FailureKind::RateLimited),
                        refund_attempt: true,
                        clear_worker: true,
                        ..Default::default()
                    },
                    "rate_limited",
                );
            }

            Outcome::SecurityBlocked { .. } => {
                self.apply(
                    &report,
                    TaskState::NeedsHumanReview,
                    TransitionPatch {
                        failure_kind: Some(FailureKind::SecurityBlock),
                        clear_worker: true,
                        ..Default::default()
                    },
                    "security_blocked",
                );
            }

            Outcome::Failed { kind, ref error } => {
                self.handle_failure(&report, kind, error, &task);
            }

            Outcome::Cancelled => {
                // Normally the cancel path rotates the token first, so a
                // matching token means the worker initiated the teardown.
                self.apply(
                    &report,
                    TaskState::Cancelled,
                    TransitionPatch {
                        failure_kind: Some(FailureKind::Cancelled),
                        ..Default::default()
                    },
                    "cancelled",
                );
            }
        }
    }

    fn handle_failure(
        &self,
        report: &OutcomeReport,
        kind: FailureKind,
        error: &str,
        task: &taskd_core::Task,
    ) {
        let retriable = kind.is_retriable();

        if retriable && task.has_attempts_left() {
            let backoff_ms = retry_backoff_ms(
                self.config.retry_backoff_base_seconds,
                task.attempt_count,
            );
            info!(
                task = %task.id,
                kind = %kind,
                attempt = task.attempt_count,
                backoff_s = backoff_ms / 1_000,
                "retriable failure, backing off"
            );
            self.apply(
                report,
                TaskState::Retrying,
                TransitionPatch {
                    failure_kind: Some(kind),
                    error: Some(error.to_string()),
                    backoff_until_ms: Some(self.clock.epoch_ms() + backoff_ms),
                    clear_worker: true,
                    ..Default::default()
                },
                "retrying",
            );
            return;
        }

        let final_kind = if retriable {
            // Attempts ran out; the original kind goes to the alert trail.
            self.alerts.alert(
                AlertLevel::P3,
                "attempts_exhausted",
                &format!(
                    "task {} failed {} times, last failure {}: {}",
                    task.id, task.attempt_count, kind, error
                ),
                self.clock.epoch_ms(),
            );
            FailureKind::Exhausted
        } else {
            kind
        };

        match final_kind {
            FailureKind::Resource => self.alerts.alert(
                AlertLevel::P2,
                "resource_failure",
                &format!("task {}: {}", task.id, error),
                self.clock.epoch_ms(),
            ),
            FailureKind::Internal => self.alerts.alert(
                AlertLevel::P1,
                "internal_failure",
                &format!("task {}: {}", task.id, error),
                self.clock.epoch_ms(),
            ),
            _ => {}
        }

        self.apply(
            report,
            TaskState::Failed,
            TransitionPatch {
                failure_kind: Some(final_kind),
                error: Some(error.to_string()),
                ..Default::default()
            },
            "failed",
        );
    }

    fn apply(&self, report: &OutcomeReport, to: TaskState, patch: TransitionPatch, status: &str) {
        match self
            .store
            .transition(&report.task_id, &[TaskState::Processing], to, patch)
        {
            Ok(_) => self.metrics.incr_task_run(status),
            Err(StoreError::NotInFromSet { .. }) | Err(StoreError::IllegalTransition { .. }) => {
                // Lost the race to recovery or a cancel; their move stands.
                debug!(task = %report.task_id, to = %to, "transition lost race, dropping");
            }
            Err(e) => warn!(task = %report.task_id, error = %e, "transition failed"),
        }
    }

    /// Arbiter became available: waiting tasks go back through retrying
    /// into the queue.
    pub fn on_arbiter_resume(&self) {
        let waiting = self.store.sweep(|t| t.state == TaskState::WaitingUnban);
        if waiting.is_empty() {
            return;
        }
        info!(count = waiting.len(), "arbiter resumed, releasing waiting tasks");
        for task in waiting {
            let step = self.store.transition(
                &task.id,
                &[TaskState::WaitingUnban],
                TaskState::Retrying,
                TransitionPatch {
                    backoff_until_ms: Some(self.clock.epoch_ms()),
                    ..Default::default()
                },
            );
            match step {
                Ok(_) => {
                    if let Err(e) = self.store.transition(
                        &task.id,
                        &[TaskState::Retrying],
                        TaskState::Pending,
                        TransitionPatch::default(),
                    ) {
                        warn!(task = %task.id, error = %e, "failed to requeue after resume");
                    }
                }
                Err(StoreError::NotInFromSet { .. }) => {} // cancelled meanwhile
                Err(e) => warn!(task = %task.id, error = %e, "failed to release waiting task"),
            }
        }
    }
}

/// `base · 2^(attempt-1)` seconds, capped at an hour.
fn retry_backoff_ms(base_secs: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    let secs = base_secs.saturating_mul(1u64 << exponent).min(MAX_RETRY_BACKOFF_SECS);
    secs * 1_000
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
