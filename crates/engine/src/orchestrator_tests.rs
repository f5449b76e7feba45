// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use taskd_core::{
    FakeClock, Priority, SequentialIdGen, TaskClass, TaskId, TaskSpec, WorkerId,
};
use taskd_storage::ClaimFilter;
use tempfile::TempDir;
use yare::parameterized;

type TestStore = Store<FakeClock, SequentialIdGen>;
type TestOrchestrator = Orchestrator<FakeClock, SequentialIdGen>;

struct Setup {
    orchestrator: TestOrchestrator,
    store: TestStore,
    arbiter: Arbiter<FakeClock, SequentialIdGen>,
    metrics: Metrics,
    clock: FakeClock,
    dir: TempDir,
}

fn setup_with(config: Config) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let store: TestStore = Store::open(
        &dir.path().join("ledger.wal"),
        &dir.path().join("snapshot.zst"),
        clock.clone(),
        SequentialIdGen::new("x"),
        config.max_attempts,
    )
    .unwrap();
    let arbiter = Arbiter::new(store.clone(), clock.clone(), &config);
    let metrics = Metrics::new();
    let orchestrator = Orchestrator::new(
        store.clone(),
        arbiter.clone(),
        metrics.clone(),
        AlertSink::new(dir.path().join("alerts.jsonl")),
        Arc::new(config),
        clock.clone(),
    );
    Setup {
        orchestrator,
        store,
        arbiter,
        metrics,
        clock,
        dir,
    }
}

fn setup() -> Setup {
    setup_with(Config::default())
}

/// Submit and claim, returning the report skeleton for the attempt.
fn claimed_report(s: &Setup, outcome: Outcome) -> (TaskId, OutcomeReport) {
    let id = s
        .store
        .submit(TaskSpec {
            name: "t".to_string(),
            description: "do".to_string(),
            class: TaskClass::Light,
            priority: Priority::Normal,
            working_dir: None,
            dedup_key: None,
            max_attempts: None,
        })
        .unwrap();
    let (task, token) = s
        .store
        .claim(&WorkerId::new("w-1"), &ClaimFilter::all())
        .unwrap()
        .unwrap();
    assert_eq!(task.id, id);
    let report = OutcomeReport {
        task_id: id.clone(),
        worker_id: WorkerId::new("w-1"),
        claim_token: token,
        outcome,
        exit_code: None,
    };
    (id, report)
}

#[test]
fn completed_outcome_reaches_terminal() {
    let s = setup();
    let (id, report) = claimed_report(&s, Outcome::Completed);
    s.orchestrator.handle_report(report);

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert!(task.worker_id.is_none());
    assert!(task.ended_at_ms.is_some());
    assert_eq!(s.metrics.task_runs("completed"), 1);
}

#[test]
fn rate_limited_refunds_the_attempt_and_pauses_globally() {
    let s = setup();
    let (id, report) = claimed_report(
        &s,
        Outcome::RateLimited {
            signature: "rate limit".to_string(),
        },
    );
    s.orchestrator.handle_report(report);

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::WaitingUnban);
    assert_eq!(task.attempt_count, 0); // refunded
    assert!(!s.arbiter.is_available());
    assert_eq!(
        s.arbiter.state().resume_at_ms,
        Some(s.clock.epoch_ms() + 3_600_000)
    );
}

#[test]
fn retriable_failure_backs_off_then_recovery_requeues() {
    let s = setup();
    let (id, report) = claimed_report(
        &s,
        Outcome::Failed {
            kind: FailureKind::Network,
            error: "connection reset".to_string(),
        },
    );
    s.orchestrator.handle_report(report);

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::Retrying);
    assert_eq!(task.failure_kind, Some(FailureKind::Network));
    // First retry waits the base backoff.
    assert_eq!(
        task.backoff_until_ms,
        Some(s.clock.epoch_ms() + 60_000)
    );
    assert_eq!(s.metrics.task_runs("retrying"), 1);
}

#[test]
fn exhausted_attempts_preserve_original_kind_in_alerts() {
    let mut config = Config::default();
    config.max_attempts = 1;
    let s = setup_with(config);

    let (id, report) = claimed_report(
        &s,
        Outcome::Failed {
            kind: FailureKind::Network,
            error: "connection reset".to_string(),
        },
    );
    s.orchestrator.handle_report(report);

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.failure_kind, Some(FailureKind::Exhausted));

    let alerts = std::fs::read_to_string(s.dir.path().join("alerts.jsonl")).unwrap();
    assert!(alerts.contains("attempts_exhausted"));
    assert!(alerts.contains("network"));
    assert_eq!(s.metrics.task_runs("failed"), 1);
}

#[test]
fn non_retriable_failure_is_terminal_immediately() {
    let s = setup();
    let (id, report) = claimed_report(
        &s,
        Outcome::Failed {
            kind: FailureKind::Resource,
            error: "no space left on device".to_string(),
        },
    );
    s.orchestrator.handle_report(report);

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.failure_kind, Some(FailureKind::Resource));

    let alerts = std::fs::read_to_string(s.dir.path().join("alerts.jsonl")).unwrap();
    assert!(alerts.contains("resource_failure"));
}

#[test]
fn security_block_goes_to_review() {
    let s = setup();
    let (id, report) = claimed_report(
        &s,
        Outcome::SecurityBlocked {
            verdict: taskd_core::ScanVerdict::Blocked {
                kinds: vec!["destructive_fs".to_string()],
            },
        },
    );
    s.orchestrator.handle_report(report);

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::NeedsHumanReview);
    assert_eq!(task.failure_kind, Some(FailureKind::SecurityBlock));
}

#[test]
fn stale_claim_token_is_dropped() {
    let s = setup();
    let (id, mut report) = claimed_report(&s, Outcome::Completed);
    report.claim_token = "stale".to_string();
    s.orchestrator.handle_report(report);

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::Processing);
    assert_eq!(s.metrics.task_runs("completed"), 0);
}

#[test]
fn report_after_cancel_is_dropped() {
    let s = setup();
    let (id, report) = claimed_report(&s, Outcome::Completed);
    s.store.cancel(&id).unwrap();

    s.orchestrator.handle_report(report);
    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::Cancelled);
}

#[test]
fn arbiter_resume_requeues_waiting_tasks() {
    let s = setup();
    let (id, report) = claimed_report(
        &s,
        Outcome::RateLimited {
            signature: "rate limit".to_string(),
        },
    );
    s.orchestrator.handle_report(report);
    assert_eq!(
        s.store.get_task(id.as_str()).unwrap().state,
        TaskState::WaitingUnban
    );

    s.arbiter.probe_succeeded().unwrap();
    s.orchestrator.on_arbiter_resume();

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::Pending);
    // Ready for a fresh claim with no attempt consumed.
    assert_eq!(task.attempt_count, 0);
    let claimed = s
        .store
        .claim(&WorkerId::new("w-2"), &ClaimFilter::all())
        .unwrap();
    assert!(claimed.is_some());
}

#[test]
fn second_retry_doubles_the_backoff() {
    let s = setup();

    // First failed attempt.
    let (id, report) = claimed_report(
        &s,
        Outcome::Failed {
            kind: FailureKind::ProcessCrash,
            error: "exit 2".to_string(),
        },
    );
    s.orchestrator.handle_report(report);

    // Requeue and fail again.
    s.store
        .transition(&id, &[TaskState::Retrying], TaskState::Pending, Default::default())
        .unwrap();
    let (task, token) = s
        .store
        .claim(&WorkerId::new("w-1"), &ClaimFilter::all())
        .unwrap()
        .unwrap();
    assert_eq!(task.attempt_count, 2);
    s.orchestrator.handle_report(OutcomeReport {
        task_id: id.clone(),
        worker_id: WorkerId::new("w-1"),
        claim_token: token,
        outcome: Outcome::Failed {
            kind: FailureKind::ProcessCrash,
            error: "exit 2".to_string(),
        },
        exit_code: Some(2),
    });

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(
        task.backoff_until_ms,
        Some(s.clock.epoch_ms() + 120_000) // 60s * 2^1
    );
}

#[parameterized(
    first_attempt = { 1, 60_000 },
    second_attempt = { 2, 120_000 },
    deep_retry_caps = { 10, 3_600_000 },
    exponent_is_clamped = { 32, 3_600_000 },
)]
fn backoff_doubles_then_caps_at_an_hour(attempt: u32, expected_ms: u64) {
    assert_eq!(retry_backoff_ms(60, attempt), expected_ms);
}
