// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery loop: periodic reconciliation of store state against the OS.
//!
//! Every transition here is a compare-and-set; losing a race to a live
//! worker or the orchestrator is a no-op. Orphaned agent subprocesses
//! are addressed twice over: kill-on-drop when a worker task dies, and
//! the pid recorded on the task row for this sweep.

use crate::alerts::{AlertLevel, AlertSink};
use crate::arbiter::Arbiter;
use crate::dispatch::DispatchGate;
use crate::metrics::Metrics;
use crate::paths::StatePaths;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use taskd_adapters::subprocess::{pid_alive, terminate_with_grace};
use taskd_adapters::{AgentCli, ResourceStatus};
use taskd_core::{Clock, Config, FailureKind, IdGen, TaskState, TransitionPatch, UuidIdGen};
use taskd_gate::Gate;
use taskd_storage::{Store, StoreError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Periodic health sweep.
pub struct Recovery<C: Clock, G: IdGen = UuidIdGen, A: AgentCli = taskd_adapters::ProcessAgentCli> {
    pub store: Store<C, G>,
    pub arbiter: Arbiter<C, G>,
    pub gate: Gate,
    pub agent: A,
    pub dispatch: DispatchGate,
    pub metrics: Metrics,
    pub alerts: AlertSink,
    pub config: Arc<Config>,
    pub paths: StatePaths,
    pub clock: C,
    /// Soft-ping deadlines for stuck-looking tasks (task id → epoch ms).
    ping_deadlines: Mutex<HashMap<String, u64>>,
}

impl<C: Clock, G: IdGen, A: AgentCli> Recovery<C, G, A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store<C, G>,
        arbiter: Arbiter<C, G>,
        gate: Gate,
        agent: A,
        dispatch: DispatchGate,
        metrics: Metrics,
        alerts: AlertSink,
        config: Arc<Config>,
        paths: StatePaths,
        clock: C,
    ) -> Self {
        Self {
            store,
            arbiter,
            gate,
            agent,
            dispatch,
            metrics,
            alerts,
            config,
            paths,
            clock,
            ping_deadlines: Mutex::new(HashMap::new()),
        }
    }

    /// Run sweeps until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.health_check_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One full sweep. Public so tests (and shutdown) can drive it.
    pub async fn tick(&self) {
        let now_ms = self.clock.epoch_ms();
        self.sweep_dead_workers(now_ms).await;
        self.sweep_stuck_tasks(now_ms).await;
        self.check_resources(now_ms);
        self.probe_rate_limit().await;
        self.requeue_eligible(now_ms);
    }

    /// Un-claim tasks held by workers whose heartbeat went stale.
    ///
    /// The crashed attempt stays counted (it was consumed at claim);
    /// the claim token rotates so a zombie worker cannot write again.
    async fn sweep_dead_workers(&self, now_ms: u64) {
        let dead_after_ms = self.config.worker_dead_after().as_millis() as u64;
        let dead: Vec<_> = self
            .store
            .workers()
            .into_iter()
            .filter(|w| !w.stopped && now_ms.saturating_sub(w.heartbeat_at_ms) > dead_after_ms)
            .collect();

        for worker in dead {
            warn!(worker = %worker.id, "worker heartbeat stale, reclaiming its tasks");
            self.alerts.alert(
                AlertLevel::P2,
                "worker_dead",
                &format!("worker {} missed 3 heartbeats", worker.id),
                now_ms,
            );

            let held = self.store.sweep(|t| {
                matches!(t.state, TaskState::Processing | TaskState::Paused)
                    && t.worker_id.as_ref() == Some(&worker.id)
            });
            for task in held {
                if let Some(pid) = task.pid {
                    if pid_alive(pid).await {
                        terminate_with_grace(pid, self.config.kill_grace()).await;
                    }
                }

                // Paused tasks route through processing to reach pending.
                if task.state == TaskState::Paused {
                    if let Err(e) = self.store.transition(
                        &task.id,
                        &[TaskState::Paused],
                        TaskState::Processing,
                        TransitionPatch::default(),
                    ) {
                        debug!(task = %task.id, error = %e, "paused un-claim lost race");
                        continue;
                    }
                }

                match self.store.transition(
                    &task.id,
                    &[TaskState::Processing],
                    TaskState::Pending,
                    TransitionPatch {
                        rotate_claim_token: Some(uuid_token()),
                        clear_worker: true,
                        ..Default::default()
                    },
                ) {
                    Ok(_) => info!(task = %task.id, "task returned to queue after worker death"),
                    Err(StoreError::NotInFromSet { .. }) => {}
                    Err(e) => warn!(task = %task.id, error = %e, "un-claim failed"),
                }
            }

            if let Err(e) = self.store.worker_stopped(&worker.id) {
                warn!(worker = %worker.id, error = %e, "failed to mark worker stopped");
            }
        }
    }

    /// Kill and retry processing tasks whose own heartbeat went stale
    /// while their worker stayed alive.
    async fn sweep_stuck_tasks(&self, now_ms: u64) {
        let dead_after_ms = self.config.worker_dead_after().as_millis() as u64;
        let ping_after_ms = self.config.heartbeat_interval().as_millis() as u64;

        let live_workers: Vec<_> = self
            .store
            .workers()
            .into_iter()
            .filter(|w| !w.stopped && now_ms.saturating_sub(w.heartbeat_at_ms) <= dead_after_ms)
            .map(|w| w.id)
            .collect();

        let stuck = self.store.sweep(|t| {
            t.state == TaskState::Processing
                && t.worker_id
                    .as_ref()
                    .map(|w| live_workers.contains(w))
                    .unwrap_or(false)
                && t.heartbeat_at_ms
                    .map(|hb| now_ms.saturating_sub(hb) > dead_after_ms)
                    .unwrap_or(false)
        });

        let to_kill = self.select_stuck_for_kill(stuck, now_ms, ping_after_ms);

        for task in to_kill {
            warn!(task = %task.id, "stuck task did not recover, killing and retrying");
            if let Some(pid) = task.pid {
                if pid_alive(pid).await {
                    terminate_with_grace(pid, self.config.kill_grace()).await;
                }
            }
            let result = self.store.transition(
                &task.id,
                &[TaskState::Processing],
                TaskState::Retrying,
                TransitionPatch {
                    failure_kind: Some(FailureKind::ProcessHang),
                    error: Some("task heartbeat went stale".to_string()),
                    backoff_until_ms: Some(now_ms),
                    rotate_claim_token: Some(uuid_token()),
                    clear_worker: true,
                    ..Default::default()
                },
            );
            if let Err(e) = result {
                debug!(task = %task.id, error = %e, "stuck-task retry lost race");
            }
        }
    }

    /// Apply the soft-ping window and decide which stuck tasks are due for
    /// kill-and-retry. Kept synchronous (and thus outside any `.await`
    /// point) so the `ping_deadlines` lock guard never needs to be `Send`.
    fn select_stuck_for_kill(
        &self,
        stuck: Vec<taskd_core::Task>,
        now_ms: u64,
        ping_after_ms: u64,
    ) -> Vec<taskd_core::Task> {
        let mut pings = self.ping_deadlines.lock();
        pings.retain(|id, _| stuck.iter().any(|t| t.id.as_str() == id.as_str()));

        let mut to_kill = Vec::new();
        for task in stuck {
            match pings.get(task.id.as_str()) {
                None => {
                    // Soft-ping: give the worker one heartbeat interval to ack.
                    debug!(task = %task.id, "stuck task, starting ping window");
                    pings.insert(task.id.as_str().to_string(), now_ms + ping_after_ms);
                }
                Some(deadline) if now_ms >= *deadline => {
                    pings.remove(task.id.as_str());
                    to_kill.push(task);
                }
                Some(_) => {}
            }
        }
        to_kill
    }

    /// Disk/memory floors: halt dispatch and trigger retention when low.
    fn check_resources(&self, now_ms: u64) {
        let status = match ResourceStatus::sample(self.paths.root()) {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "resource sample failed");
                return;
            }
        };
        self.metrics.set_disk_free_bytes(status.disk_free_bytes);

        let low = status.is_low(
            self.config.min_disk_space_bytes(),
            self.config.min_free_memory_mb * 1024 * 1024,
        );

        if low && !self.dispatch.is_resource_halted() {
            self.alerts.alert(
                AlertLevel::P2,
                "resource_low",
                &format!(
                    "free disk {} bytes, halting dispatch and purging retention",
                    status.disk_free_bytes
                ),
                now_ms,
            );
            self.dispatch.set_resource_halted(true);
            self.purge_retention();
        } else if !low && self.dispatch.is_resource_halted() {
            info!("resources recovered, dispatch resumed");
            self.dispatch.set_resource_halted(false);
        }
    }

    fn purge_retention(&self) {
        match self
            .store
            .purge_terminal(self.config.retention_grace_seconds * 1_000)
        {
            Ok(removed) => {
                for id in &removed {
                    if let Err(e) = self.paths.remove_task_dir(id) {
                        warn!(task = %id, error = %e, "failed to remove task dir");
                    }
                }
                if !removed.is_empty() {
                    info!(count = removed.len(), "retention purged terminal tasks");
                }
            }
            Err(e) => warn!(error = %e, "retention purge failed"),
        }
    }

    /// Probe the agent when the backoff deadline has passed.
    async fn probe_rate_limit(&self) {
        if !self.arbiter.probe_due() {
            return;
        }
        match self.agent.probe().await {
            Ok(output) if self.gate.rate_limit_signature(&output).is_none() => {
                if let Err(e) = self.arbiter.probe_succeeded() {
                    warn!(error = %e, "failed to publish probe success");
                }
            }
            Ok(_) | Err(_) => {
                if let Err(e) = self.arbiter.probe_failed() {
                    warn!(error = %e, "failed to extend backoff");
                }
            }
        }
    }

    /// Move retrying tasks whose backoff elapsed back into the queue.
    fn requeue_eligible(&self, now_ms: u64) {
        let eligible = self.store.sweep(|t| {
            t.state == TaskState::Retrying
                && t.backoff_until_ms.map(|at| at <= now_ms).unwrap_or(true)
        });
        for task in eligible {
            match self.store.transition(
                &task.id,
                &[TaskState::Retrying],
                TaskState::Pending,
                TransitionPatch::default(),
            ) {
                Ok(_) => debug!(task = %task.id, "retry backoff elapsed, requeued"),
                Err(StoreError::NotInFromSet { .. }) => {}
                Err(e) => warn!(task = %task.id, error = %e, "requeue failed"),
            }
        }
    }
}

fn uuid_token() -> String {
    UuidIdGen.next()
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
