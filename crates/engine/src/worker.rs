// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool: owns agent subprocesses and proposes outcomes.
//!
//! Each worker loops: heartbeat → availability wait → claim → scan →
//! spawn → stream. All worker-side task writes are fenced by the claim
//! token; a fenced-out worker kills its subprocess and walks away
//! without reporting. Workers never transition task state; the
//! orchestrator owns the state machine.

use crate::arbiter::Arbiter;
use crate::dispatch::DispatchGate;
use crate::paths::StatePaths;
use crate::resume::{self, ChunkTracker};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use taskd_adapters::{AgentCli, AgentEvent};
use taskd_core::{
    Clock, Config, IdGen, Outcome, OutcomeReport, ScanVerdict, SecurityFinding, SecurityVerdict,
    Severity, Task, TaskId, TaskPatch, WorkerId,
};
use taskd_gate::{AuditLog, Gate};
use taskd_storage::{Store, StoreError};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Poll interval when the queue is empty or dispatch is gated.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Stderr lines retained for exit classification.
const STDERR_TAIL_LINES: usize = 50;

struct TaskControlHandle {
    cancel: Arc<Notify>,
    pause: watch::Sender<bool>,
}

/// Registry of per-task control channels (cancel, pause).
///
/// The listener and orchestrator signal through this; the owning worker
/// holds the receiving ends while the task runs.
#[derive(Clone, Default)]
pub struct TaskControls {
    inner: Arc<Mutex<HashMap<String, TaskControlHandle>>>,
}

impl TaskControls {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, task_id: &TaskId) -> (Arc<Notify>, watch::Receiver<bool>) {
        let cancel = Arc::new(Notify::new());
        let (pause_tx, pause_rx) = watch::channel(false);
        self.inner.lock().insert(
            task_id.as_str().to_string(),
            TaskControlHandle {
                cancel: Arc::clone(&cancel),
                pause: pause_tx,
            },
        );
        (cancel, pause_rx)
    }

    fn deregister(&self, task_id: &TaskId) {
        self.inner.lock().remove(task_id.as_str());
    }

    /// Signal cancellation to the owning worker. Returns false when no
    /// worker currently runs the task.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let inner = self.inner.lock();
        match inner.get(task_id.as_str()) {
            Some(handle) => {
                handle.cancel.notify_one();
                true
            }
            None => false,
        }
    }

    /// Flip the pause flag for a running task.
    pub fn set_paused(&self, task_id: &TaskId, paused: bool) -> bool {
        let inner = self.inner.lock();
        match inner.get(task_id.as_str()) {
            Some(handle) => handle.pause.send(paused).is_ok(),
            None => false,
        }
    }
}

/// Everything a worker needs, injected at boot.
pub struct WorkerDeps<C: Clock, G: IdGen, A: AgentCli> {
    pub store: Store<C, G>,
    pub gate: Gate,
    pub audit: AuditLog,
    pub arbiter: Arbiter<C, G>,
    pub dispatch: DispatchGate,
    pub agent: A,
    pub outcomes: mpsc::Sender<OutcomeReport>,
    pub controls: TaskControls,
    pub config: Arc<Config>,
    pub paths: StatePaths,
    pub clock: C,
}

impl<C: Clock, G: IdGen, A: AgentCli> Clone for WorkerDeps<C, G, A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gate: self.gate.clone(),
            audit: self.audit.clone(),
            arbiter: self.arbiter.clone(),
            dispatch: self.dispatch.clone(),
            agent: self.agent.clone(),
            outcomes: self.outcomes.clone(),
            controls: self.controls.clone(),
            config: Arc::clone(&self.config),
            paths: self.paths.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Fixed-size pool of supervised worker tasks.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<C: Clock, G: IdGen + 'static, A: AgentCli>(deps: WorkerDeps<C, G, A>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut handles = Vec::new();
        for idx in 0..deps.config.num_workers {
            let deps = deps.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            handles.push(tokio::spawn(worker_loop(idx, deps, shutdown_rx)));
        }
        Self {
            shutdown_tx,
            handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal shutdown and wait for every worker to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop<C: Clock, G: IdGen + 'static, A: AgentCli>(
    idx: usize,
    deps: WorkerDeps<C, G, A>,
    mut shutdown: watch::Receiver<bool>,
) {
    let worker_id = WorkerId::new(format!("worker-{idx}"));
    if let Err(e) = deps.store.register_worker(&worker_id, std::process::id()) {
        warn!(worker = %worker_id, error = %e, "worker registration failed");
        return;
    }
    info!(worker = %worker_id, "worker started");

    let mut last_heartbeat: Option<std::time::Instant> = None;
    loop {
        if *shutdown.borrow() {
            break;
        }
        // Idle polls run faster than the heartbeat cadence; only stamp
        // liveness once per interval.
        let now = deps.clock.now();
        let due = last_heartbeat
            .map(|at| now.duration_since(at) >= deps.config.heartbeat_interval())
            .unwrap_or(true);
        if due {
            if let Err(e) = deps.store.heartbeat(&worker_id, None) {
                warn!(worker = %worker_id, error = %e, "heartbeat failed");
            }
            last_heartbeat = Some(now);
        }

        // Global pause: wait for the arbiter instead of spinning.
        if !deps.arbiter.is_available() {
            let mut availability = deps.arbiter.subscribe();
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = availability.changed() => {}
                _ = tokio::time::sleep(deps.config.heartbeat_interval()) => {}
            }
            continue;
        }

        let Some(filter) = deps.dispatch.claim_filter(&deps.store) else {
            idle_wait(&mut shutdown).await;
            continue;
        };

        match deps.store.claim(&worker_id, &filter) {
            Ok(Some((task, claim_token))) => {
                debug!(worker = %worker_id, task = %task.id, attempt = task.attempt_count, "claimed");
                if let Some(report) =
                    run_task(&deps, &worker_id, task, claim_token, &mut shutdown).await
                {
                    if deps.outcomes.send(report).await.is_err() {
                        break; // orchestrator gone, daemon is going down
                    }
                }
            }
            Ok(None) => idle_wait(&mut shutdown).await,
            Err(e) => {
                warn!(worker = %worker_id, error = %e, "claim failed");
                idle_wait(&mut shutdown).await;
            }
        }
    }

    let _ = deps.store.worker_stopped(&worker_id);
    info!(worker = %worker_id, "worker stopped");
}

async fn idle_wait(shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = shutdown.changed() => {}
        _ = tokio::time::sleep(IDLE_POLL) => {}
    }
}

/// Run one claimed task to an outcome.
///
/// Returns `None` when the worker was fenced out or shut down mid-run;
/// the recovery loop (or shutdown sweep) owns the task from there.
async fn run_task<C: Clock, G: IdGen + 'static, A: AgentCli>(
    deps: &WorkerDeps<C, G, A>,
    worker_id: &WorkerId,
    task: Task,
    claim_token: String,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<OutcomeReport> {
    let task_id = task.id.clone();
    let (cancel, pause_rx) = deps.controls.register(&task_id);

    let result = drive_task(deps, worker_id, task, &claim_token, cancel, pause_rx, shutdown).await;

    deps.controls.deregister(&task_id);
    result.map(|(outcome, exit_code)| OutcomeReport {
        task_id,
        worker_id: worker_id.clone(),
        claim_token,
        outcome,
        exit_code,
    })
}

async fn drive_task<C: Clock, G: IdGen + 'static, A: AgentCli>(
    deps: &WorkerDeps<C, G, A>,
    worker_id: &WorkerId,
    mut task: Task,
    claim_token: &str,
    cancel: Arc<Notify>,
    mut pause_rx: watch::Receiver<bool>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<(Outcome, Option<i32>)> {
    let now_ms = deps.clock.epoch_ms();

    // Scan the command before anything touches the OS. Tasks that were
    // already scanned (at submission, or released by an operator) keep
    // their verdict; re-scanning a released task would just re-block it.
    let verdict = if task.security_verdict == SecurityVerdict::Unscanned {
        let verdict = deps.gate.scan_command(&task.command);
        deps.audit.record_verdict(&task.id, &verdict, now_ms);
        verdict
    } else {
        ScanVerdict::Allowed
    };
    match &verdict {
        ScanVerdict::Allowed => {
            if patch_fenced(
                deps,
                &task.id,
                claim_token,
                TaskPatch {
                    security_verdict: Some(SecurityVerdict::Allowed),
                    ..Default::default()
                },
            ) {
                return None;
            }
        }
        ScanVerdict::NeedsReview { kinds } | ScanVerdict::Blocked { kinds } => {
            let severity = match &verdict {
                ScanVerdict::Blocked { .. } => Severity::Critical,
                _ => Severity::High,
            };
            for kind in kinds {
                let finding = SecurityFinding {
                    task_id: task.id.clone(),
                    kind: kind.clone(),
                    span: (0, task.command.len()),
                    severity,
                    masked_value: None,
                    at_ms: now_ms,
                };
                if let Err(e) = deps.store.record_finding(finding.clone()) {
                    warn!(task = %task.id, error = %e, "failed to persist finding");
                }
                deps.audit.record_finding(&finding, now_ms);
            }
            if patch_fenced(
                deps,
                &task.id,
                claim_token,
                TaskPatch {
                    security_verdict: Some(SecurityVerdict::Blocked),
                    ..Default::default()
                },
            ) {
                return None;
            }
            return Some((Outcome::SecurityBlocked { verdict }, None));
        }
    }

    // Attempt loop: re-entered after an operator pause/resume cycle.
    loop {
        match run_attempt(deps, worker_id, &mut task, claim_token, &cancel, &mut pause_rx, shutdown)
            .await?
        {
            AttemptEnd::Outcome(outcome, exit_code) => return Some((outcome, exit_code)),
            AttemptEnd::Resumed => continue,
        }
    }
}

enum AttemptEnd {
    Outcome(Outcome, Option<i32>),
    /// Operator pause ended; start the attempt again with resume context.
    Resumed,
}

#[allow(clippy::too_many_arguments)]
async fn run_attempt<C: Clock, G: IdGen + 'static, A: AgentCli>(
    deps: &WorkerDeps<C, G, A>,
    worker_id: &WorkerId,
    task: &mut Task,
    claim_token: &str,
    cancel: &Arc<Notify>,
    pause_rx: &mut watch::Receiver<bool>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<AttemptEnd> {
    use taskd_core::TaskClass;

    let working_dir = task
        .working_dir
        .clone()
        .unwrap_or_else(|| deps.paths.task_dir(&task.id));
    if let Err(e) = std::fs::create_dir_all(&working_dir) {
        return Some(AttemptEnd::Outcome(
            Outcome::Failed {
                kind: taskd_core::FailureKind::Resource,
                error: format!("cannot create working dir: {e}"),
            },
            None,
        ));
    }

    let mut output_log = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(deps.paths.output_log(&task.id))
    {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(task = %task.id, error = %e, "cannot open output log");
            None
        }
    };

    let invocation = resume::build_invocation(task, &deps.config, working_dir);
    let (event_tx, mut events) = mpsc::channel(256);
    let handle = match deps.agent.spawn(invocation, event_tx).await {
        Ok(handle) => handle,
        Err(e) => {
            return Some(AttemptEnd::Outcome(
                Outcome::Failed {
                    kind: taskd_core::FailureKind::ProcessCrash,
                    error: format!("spawn failed: {e}"),
                },
                None,
            ));
        }
    };

    if let Some(pid) = handle.pid {
        if patch_fenced(
            deps,
            &task.id,
            claim_token,
            TaskPatch {
                pid: Some(pid),
                ..Default::default()
            },
        ) {
            handle.kill();
            return None;
        }
    }

    let drain_grace = deps.config.kill_grace() + Duration::from_secs(5);
    let timeout_at = tokio::time::Instant::now() + deps.config.timeout_for(task.class);
    let mut heartbeat = tokio::time::interval(deps.config.heartbeat_interval());
    let mut ring = task.output_tail.clone();
    let mut chunks = ChunkTracker::from_blob(task.resume_blob.as_ref());
    let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut exit_code: Option<i32> = None;
    let mut total_bytes: u64 = 0;

    let outcome = loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    break Outcome::Failed {
                        kind: taskd_core::FailureKind::ProcessCrash,
                        error: "agent output stream ended unexpectedly".to_string(),
                    };
                };
                let (line, is_stderr) = match event {
                    AgentEvent::Stdout(line) => (line, false),
                    AgentEvent::Stderr(line) => (line, true),
                    AgentEvent::Exited { code } => {
                        exit_code = code;
                        if code == Some(0) {
                            break Outcome::Completed;
                        }
                        let error_text = if stderr_tail.is_empty() {
                            ring.tail_lines(20).join("\n")
                        } else {
                            stderr_tail.iter().cloned().collect::<Vec<_>>().join("\n")
                        };
                        let kind = deps.gate.classify(&error_text);
                        if kind == taskd_core::FailureKind::RateLimited {
                            break Outcome::RateLimited {
                                signature: "exit classification".to_string(),
                            };
                        }
                        break Outcome::Failed {
                            kind,
                            error: truncate_error(&error_text),
                        };
                    }
                };

                if let Some(signature) = deps.gate.rate_limit_signature(&line) {
                    handle.kill();
                    exit_code = drain_until_exit(&mut events, drain_grace).await;
                    break Outcome::RateLimited { signature };
                }

                total_bytes += line.len() as u64 + 1;

                let (masked, hits) = deps.gate.mask(&line);
                record_mask_hits(deps, &task.id, &hits);
                if !hits.is_empty()
                    && patch_fenced(
                        deps,
                        &task.id,
                        claim_token,
                        TaskPatch {
                            security_verdict: Some(SecurityVerdict::Masked),
                            ..Default::default()
                        },
                    )
                {
                    handle.kill();
                    return None;
                }

                if let Some(file) = output_log.as_mut() {
                    if writeln!(file, "{}", masked).is_err() {
                        output_log = None;
                    }
                }

                let mut chunk = masked.clone();
                chunk.push('\n');
                ring.append(&chunk);
                if patch_fenced(
                    deps,
                    &task.id,
                    claim_token,
                    TaskPatch {
                        output_append: Some(chunk),
                        ..Default::default()
                    },
                ) {
                    handle.kill();
                    return None;
                }

                if is_stderr {
                    if stderr_tail.len() == STDERR_TAIL_LINES {
                        stderr_tail.pop_front();
                    }
                    stderr_tail.push_back(masked.clone());
                }

                if task.class == TaskClass::Heavy {
                    chunks.observe_line(&masked);
                    if chunks.take_dirty() {
                        if let Some(blob) = chunks.to_blob() {
                            task.resume_blob = Some(blob.clone());
                            persist_resume_blob(deps, task, claim_token, &blob);
                        }
                    }
                }

                if total_bytes > deps.config.max_output_size_bytes {
                    handle.kill();
                    exit_code = drain_until_exit(&mut events, drain_grace).await;
                    break Outcome::Failed {
                        kind: taskd_core::FailureKind::Resource,
                        error: format!(
                            "output exceeded cap of {} bytes",
                            deps.config.max_output_size_bytes
                        ),
                    };
                }
            }

            _ = cancel.notified() => {
                handle.kill();
                exit_code = drain_until_exit(&mut events, drain_grace).await;
                break Outcome::Cancelled;
            }

            result = pause_rx.changed() => {
                if result.is_err() {
                    continue;
                }
                if !*pause_rx.borrow() {
                    continue;
                }
                info!(task = %task.id, "pausing at operator request");
                handle.kill();
                let _ = drain_until_exit(&mut events, drain_grace).await;

                // Carry what we have as resume context.
                if task.class == TaskClass::Medium {
                    if let Some(blob) = resume::medium_blob(&ring, deps.config.resume_context_lines) {
                        task.resume_blob = Some(blob.clone());
                        persist_resume_blob(deps, task, claim_token, &blob);
                    }
                }

                if wait_while_paused(deps, worker_id, task, pause_rx, cancel, shutdown).await? {
                    return Some(AttemptEnd::Resumed);
                }
                // Cancelled while paused.
                return Some(AttemptEnd::Outcome(Outcome::Cancelled, None));
            }

            _ = tokio::time::sleep_until(timeout_at) => {
                handle.kill();
                exit_code = drain_until_exit(&mut events, drain_grace).await;
                break Outcome::Failed {
                    kind: taskd_core::FailureKind::ProcessHang,
                    error: format!(
                        "attempt exceeded the {}s class timeout",
                        deps.config.timeout_for(task.class).as_secs()
                    ),
                };
            }

            _ = heartbeat.tick() => {
                if let Err(e) = deps.store.heartbeat(worker_id, Some(&task.id)) {
                    warn!(worker = %worker_id, error = %e, "heartbeat failed");
                }
            }

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    handle.kill();
                    let _ = drain_until_exit(&mut events, drain_grace).await;
                    return None;
                }
            }
        }
    };

    // Persist medium resume context for the next attempt.
    if task.class == TaskClass::Medium && wants_medium_context(&outcome) {
        if let Some(blob) = resume::medium_blob(&ring, deps.config.resume_context_lines) {
            persist_resume_blob(deps, task, claim_token, &blob);
        }
    }

    Some(AttemptEnd::Outcome(outcome, exit_code))
}

fn wants_medium_context(outcome: &Outcome) -> bool {
    match outcome {
        Outcome::RateLimited { .. } => true,
        Outcome::Failed { kind, .. } => kind.is_retriable(),
        _ => false,
    }
}

/// Heartbeat-preserving wait for the operator to resume a paused task.
///
/// Returns `Some(true)` to re-enter the attempt, `Some(false)` when the
/// task was cancelled while paused, `None` on shutdown.
async fn wait_while_paused<C: Clock, G: IdGen + 'static, A: AgentCli>(
    deps: &WorkerDeps<C, G, A>,
    worker_id: &WorkerId,
    task: &Task,
    pause_rx: &mut watch::Receiver<bool>,
    cancel: &Arc<Notify>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<bool> {
    let mut heartbeat = tokio::time::interval(deps.config.heartbeat_interval());
    loop {
        tokio::select! {
            result = pause_rx.changed() => {
                if result.is_err() || !*pause_rx.borrow() {
                    info!(task = %task.id, "resuming after pause");
                    return Some(true);
                }
            }
            _ = cancel.notified() => return Some(false),
            _ = heartbeat.tick() => {
                let _ = deps.store.heartbeat(worker_id, Some(&task.id));
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return None;
                }
            }
        }
    }
}

/// Apply a fenced patch. Returns true when the claim is stale and the
/// worker must abandon the task.
fn patch_fenced<C: Clock, G: IdGen, A: AgentCli>(
    deps: &WorkerDeps<C, G, A>,
    task_id: &TaskId,
    claim_token: &str,
    patch: TaskPatch,
) -> bool {
    match deps.store.update_by_token(task_id, claim_token, patch) {
        Ok(()) => false,
        Err(StoreError::StaleClaim(_)) => {
            debug!(task = %task_id, "claim fenced out, abandoning");
            true
        }
        Err(e) => {
            warn!(task = %task_id, error = %e, "fenced patch failed");
            false
        }
    }
}

fn persist_resume_blob<C: Clock, G: IdGen, A: AgentCli>(
    deps: &WorkerDeps<C, G, A>,
    task: &Task,
    claim_token: &str,
    blob: &taskd_core::ResumeBlob,
) {
    let _ = deps.store.update_by_token(
        &task.id,
        claim_token,
        TaskPatch {
            resume_blob: Some(blob.clone()),
            ..Default::default()
        },
    );
    // Mirror to the task dir for operator inspection.
    if let Ok(json) = serde_json::to_vec_pretty(blob) {
        let _ = std::fs::write(deps.paths.resume_blob(&task.id), json);
    }
}

fn record_mask_hits<C: Clock, G: IdGen, A: AgentCli>(
    deps: &WorkerDeps<C, G, A>,
    task_id: &TaskId,
    hits: &[taskd_gate::MaskHit],
) {
    let at_ms = deps.clock.epoch_ms();
    for hit in hits {
        let finding = SecurityFinding {
            task_id: task_id.clone(),
            kind: hit.kind.clone(),
            span: hit.span,
            severity: hit.severity,
            masked_value: Some(hit.replacement.clone()),
            at_ms,
        };
        if let Err(e) = deps.store.record_finding(finding.clone()) {
            warn!(task = %task_id, error = %e, "failed to persist finding");
        }
        deps.audit.record_finding(&finding, at_ms);
    }
}

async fn drain_until_exit(
    events: &mut mpsc::Receiver<AgentEvent>,
    per_recv_grace: Duration,
) -> Option<i32> {
    loop {
        match tokio::time::timeout(per_recv_grace, events.recv()).await {
            Ok(Some(AgentEvent::Exited { code })) => return code,
            Ok(Some(_)) => continue,
            Ok(None) => return None,
            Err(_) => return None,
        }
    }
}

fn truncate_error(text: &str) -> String {
    const MAX: usize = 2_000;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut cut = MAX;
        while cut < text.len() && !text.is_char_boundary(cut) {
            cut += 1;
        }
        text[..cut].to_string()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
