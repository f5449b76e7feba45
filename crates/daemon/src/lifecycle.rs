// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and shutdown.
//!
//! Startup: resolve paths, take the exclusive lock, load config, open
//! the store (snapshot + WAL replay), compile the gate, wire the
//! arbiter / dispatch gate / worker pool / orchestrator / recovery
//! loop. Shutdown reverses it and leaves the queue clean for restart.

use fs2::FileExt;
use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskd_adapters::{CrontabManager, ProcessAgentCli, SystemCrontab};
use taskd_core::{
    Config, ConfigError, IdGen, SystemClock, TaskState, TransitionPatch, UuidIdGen,
};
use taskd_engine::{
    AlertSink, Arbiter, DispatchGate, Metrics, Orchestrator, Recovery, StatePaths, TaskControls,
    WorkerDeps, WorkerPool,
};
use taskd_gate::{AuditLog, Gate, GateError};
use taskd_storage::{Checkpointer, Store, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors that can occur during daemon lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no usable state directory (set TASKD_STATE_DIR or HOME)")]
    NoStateDir,
    #[error("another taskd instance holds the lock")]
    LockFailed(#[source] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("gate error: {0}")]
    Gate(#[from] GateError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Concrete store type used by the daemon.
pub type DaemonStore = Store<SystemClock, UuidIdGen>;

/// Outcome channel depth; workers block briefly when the orchestrator
/// falls behind.
const OUTCOME_CHANNEL_DEPTH: usize = 64;

/// Checkpoint interval (60 seconds)
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

/// Fully wired daemon.
pub struct Daemon {
    pub store: DaemonStore,
    pub gate: Gate,
    pub audit: AuditLog,
    pub arbiter: Arbiter<SystemClock, UuidIdGen>,
    pub dispatch: DispatchGate,
    pub metrics: Metrics,
    pub alerts: AlertSink,
    pub controls: TaskControls,
    pub config: Arc<Config>,
    pub paths: StatePaths,
    pub clock: SystemClock,
    pub crontab: CrontabManager<SystemCrontab>,
    shutdown_tx: watch::Sender<bool>,
    // Taken once by `shutdown`; Option so shutdown can run through an Arc.
    pool: parking_lot::Mutex<Option<WorkerPool>>,
    background: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    // Held for the daemon's lifetime; dropping releases the flock.
    _lock_file: File,
}

impl Daemon {
    /// Subscribe to the daemon-wide shutdown signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Request shutdown without waiting (used by the Shutdown op).
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Graceful shutdown: stop workers, requeue interrupted tasks,
    /// write a final checkpoint. Idempotent.
    pub async fn shutdown(&self) {
        info!("shutting down");
        let _ = self.shutdown_tx.send(true);
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
        let background = std::mem::take(&mut *self.background.lock());
        for handle in background {
            let _ = handle.await;
        }

        // Workers that were mid-attempt left their tasks processing;
        // requeue so the next boot claims them promptly. The consumed
        // attempt stays counted.
        for task in self
            .store
            .sweep(|t| matches!(t.state, TaskState::Processing | TaskState::Paused))
        {
            if task.state == TaskState::Paused {
                let _ = self.store.transition(
                    &task.id,
                    &[TaskState::Paused],
                    TaskState::Processing,
                    TransitionPatch::default(),
                );
            }
            let result = self.store.transition(
                &task.id,
                &[TaskState::Processing],
                TaskState::Pending,
                TransitionPatch {
                    rotate_claim_token: Some(UuidIdGen.next()),
                    clear_worker: true,
                    ..Default::default()
                },
            );
            match result {
                Ok(_) => info!(task = %task.id, "requeued interrupted task"),
                Err(e) => warn!(task = %task.id, error = %e, "failed to requeue at shutdown"),
            }
        }

        // Final checkpoint so restart replays a minimal WAL tail.
        let (seq, ledger) = self.store.checkpoint_state();
        let checkpointer = Checkpointer::new(self.paths.snapshot());
        match checkpointer.checkpoint_sync(seq, &ledger) {
            Ok(_) => {
                if let Err(e) = self.store.truncate_wal(seq) {
                    warn!(error = %e, "failed to truncate WAL at shutdown");
                }
            }
            Err(e) => warn!(error = %e, "final checkpoint failed"),
        }

        let _ = std::fs::remove_file(self.paths.socket());
        info!("shutdown complete");
    }
}

/// Build and start every component.
pub fn startup(state_root: PathBuf) -> Result<Daemon, LifecycleError> {
    let paths = StatePaths::new(state_root);
    paths.ensure_layout()?;

    let lock_file = acquire_lock(&paths)?;

    let config = Arc::new(Config::load(&paths.config_file())?);
    let clock = SystemClock;

    let store: DaemonStore = Store::open(
        &paths.wal(),
        &paths.snapshot(),
        clock.clone(),
        UuidIdGen,
        config.max_attempts,
    )?;

    let gate = Gate::from_config(&config)?;
    let audit = AuditLog::new(paths.audit_log());
    let alerts = AlertSink::new(paths.alerts_log());
    let metrics = Metrics::new();
    let arbiter = Arbiter::new(store.clone(), clock.clone(), &config);
    let dispatch = DispatchGate::new(&config);
    let controls = TaskControls::new();
    let crontab = CrontabManager::new(SystemCrontab, crate::env::taskctl_path());

    let agent = ProcessAgentCli::new(config.agent_program.clone(), config.kill_grace());
    let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL_DEPTH);
    let (shutdown_tx, _) = watch::channel(false);

    let pool = WorkerPool::spawn(WorkerDeps {
        store: store.clone(),
        gate: gate.clone(),
        audit: audit.clone(),
        arbiter: arbiter.clone(),
        dispatch: dispatch.clone(),
        agent: agent.clone(),
        outcomes: outcome_tx,
        controls: controls.clone(),
        config: Arc::clone(&config),
        paths: paths.clone(),
        clock: clock.clone(),
    });
    info!(workers = pool.worker_count(), "worker pool started");

    let orchestrator = Orchestrator::new(
        store.clone(),
        arbiter.clone(),
        metrics.clone(),
        alerts.clone(),
        Arc::clone(&config),
        clock.clone(),
    );
    let recovery = Recovery::new(
        store.clone(),
        arbiter.clone(),
        gate.clone(),
        agent,
        dispatch.clone(),
        metrics.clone(),
        alerts.clone(),
        Arc::clone(&config),
        paths.clone(),
        clock.clone(),
    );

    let mut background = Vec::new();
    background.push(tokio::spawn(
        orchestrator.run(outcome_rx, shutdown_tx.subscribe()),
    ));
    background.push(tokio::spawn(recovery.run(shutdown_tx.subscribe())));
    background.push(spawn_checkpoint_task(store.clone(), paths.snapshot(), shutdown_tx.subscribe()));

    Ok(Daemon {
        store,
        gate,
        audit,
        arbiter,
        dispatch,
        metrics,
        alerts,
        controls,
        config,
        paths,
        clock,
        crontab,
        shutdown_tx,
        pool: parking_lot::Mutex::new(Some(pool)),
        background: parking_lot::Mutex::new(background),
        _lock_file: lock_file,
    })
}

fn acquire_lock(paths: &StatePaths) -> Result<File, LifecycleError> {
    let mut lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(paths.lock_file())?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    let _ = writeln!(lock_file, "{}", std::process::id());
    Ok(lock_file)
}

/// Periodic snapshot + WAL truncation.
///
/// WAL truncation only happens after the snapshot is fully durable
/// (tmp write → fsync → rename → dir fsync), so a crash mid-checkpoint
/// never loses events.
fn spawn_checkpoint_task(
    store: DaemonStore,
    snapshot_path: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let checkpointer = Checkpointer::new(snapshot_path);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
        interval.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let (seq, ledger) = store.checkpoint_state();
            if seq == 0 {
                continue;
            }

            let handle = checkpointer.start(seq, ledger);
            let result = tokio::task::spawn_blocking(move || handle.wait()).await;

            match result {
                Ok(Ok(checkpoint)) => {
                    tracing::debug!(
                        seq = checkpoint.seq,
                        size_bytes = checkpoint.size_bytes,
                        "checkpoint complete"
                    );
                    if let Err(e) = store.truncate_wal(seq) {
                        warn!(error = %e, "failed to truncate WAL after checkpoint");
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "checkpoint failed, WAL not truncated"),
                Err(e) => warn!(error = %e, "checkpoint task panicked"),
            }
        }
    })
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
