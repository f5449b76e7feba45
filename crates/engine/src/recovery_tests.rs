// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use taskd_adapters::FakeAgentCli;
use taskd_core::{
    FakeClock, Priority, SequentialIdGen, TaskClass, TaskId, TaskSpec, WorkerId,
};
use taskd_storage::ClaimFilter;
use tempfile::TempDir;

type TestRecovery = Recovery<FakeClock, SequentialIdGen, FakeAgentCli>;
type TestStore = Store<FakeClock, SequentialIdGen>;

struct Setup {
    recovery: TestRecovery,
    store: TestStore,
    arbiter: Arbiter<FakeClock, SequentialIdGen>,
    agent: FakeAgentCli,
    dispatch: DispatchGate,
    clock: FakeClock,
    _dir: TempDir,
}

fn setup_with(config: Config) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let paths = StatePaths::new(dir.path());
    paths.ensure_layout().unwrap();
    let store: TestStore = Store::open(
        &paths.wal(),
        &paths.snapshot(),
        clock.clone(),
        SequentialIdGen::new("x"),
        config.max_attempts,
    )
    .unwrap();
    let arbiter = Arbiter::new(store.clone(), clock.clone(), &config);
    let agent = FakeAgentCli::new();
    let dispatch = DispatchGate::new(&config);
    let config = Arc::new(config);
    let recovery = Recovery::new(
        store.clone(),
        arbiter.clone(),
        Gate::from_config(&config).unwrap(),
        agent.clone(),
        dispatch.clone(),
        Metrics::new(),
        AlertSink::new(paths.alerts_log()),
        config,
        paths,
        clock.clone(),
    );
    Setup {
        recovery,
        store,
        arbiter,
        agent,
        dispatch,
        clock,
        _dir: dir,
    }
}

fn setup() -> Setup {
    setup_with(Config::default())
}

fn submit_and_claim(s: &Setup, worker: &str) -> TaskId {
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
    let worker_id = WorkerId::new(worker);
    s.store.register_worker(&worker_id, 1).unwrap();
    s.store.claim(&worker_id, &ClaimFilter::all()).unwrap().unwrap();
    id
}

#[tokio::test]
async fn dead_worker_tasks_return_to_queue() {
    let s = setup();
    let id = submit_and_claim(&s, "w-1");
    let old_token = s.store.get_task(id.as_str()).unwrap().claim_token.clone();

    // Miss more than three heartbeats.
    s.clock.advance(std::time::Duration::from_secs(120));
    s.recovery.tick().await;

    let task = s.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert!(task.worker_id.is_none());
    assert_ne!(task.claim_token, old_token);
    // The crashed attempt stays consumed.
    assert_eq!(task.attempt_count, 1);

    // Second claim proceeds normally.
    let w2 = WorkerId::new("w-2");
    s.store.register_worker(&w2, 2).unwrap();
    let (task, _) = s.store.claim(&w2, &ClaimFilter::all()).unwrap().unwrap();
    assert_eq!(task.attempt_count, 2);

    let worker = s
        .store
        .workers()
        .into_iter()
        .find(|w| w.id.as_str() == "w-1")
        .unwrap();
    assert!(worker.stopped);
}

#[tokio::test]
async fn live_worker_tasks_are_left_alone() {
    let s = setup();
    let id = submit_and_claim(&s, "w-1");

    s.clock.advance(std::time::Duration::from_secs(120));
    // Heartbeat arrives just before the sweep.
    s.store
        .heartbeat(&WorkerId::new("w-1"), Some(&id))
        .unwrap();
    s.recovery.tick().await;

    assert_eq!(
        s.store.get_task(id.as_str()).unwrap().state,
        TaskState::Processing
    );
}

#[tokio::test]
async fn stuck_task_gets_a_ping_window_then_retries() {
    let s = setup();
    let id = submit_and_claim(&s, "w-1");
    let worker_id = WorkerId::new("w-1");

    // Worker stays alive but the task's heartbeat goes stale: the claim
    // stamped both at t0, so advance past 3H and refresh only the worker.
    s.clock.advance(std::time::Duration::from_secs(120));
    s.store.heartbeat(&worker_id, None).unwrap();

    // First sweep opens the ping window; the task is untouched.
    s.recovery.tick().await;
    assert_eq!(
        s.store.get_task(id.as_str()).unwrap().state,
        TaskState::Processing
    );

    // No ack within a heartbeat interval: killed and retried.
    s.clock.advance(std::time::Duration::from_secs(31));
    s.store.heartbeat(&worker_id, None).unwrap();
    s.recovery.tick().await;

    let task = s.store.get_task(id.as_str()).unwrap();
    // Backoff of zero means the same sweep already requeued it.
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.failure_kind, Some(FailureKind::ProcessHang));
}

#[tokio::test]
async fn stuck_task_that_recovers_is_spared() {
    let s = setup();
    let id = submit_and_claim(&s, "w-1");
    let worker_id = WorkerId::new("w-1");

    s.clock.advance(std::time::Duration::from_secs(120));
    s.store.heartbeat(&worker_id, None).unwrap();
    s.recovery.tick().await; // opens ping window

    // The worker acks by heartbeating the task.
    s.store.heartbeat(&worker_id, Some(&id)).unwrap();
    s.clock.advance(std::time::Duration::from_secs(31));
    s.store.heartbeat(&worker_id, None).unwrap();
    s.recovery.tick().await;

    assert_eq!(
        s.store.get_task(id.as_str()).unwrap().state,
        TaskState::Processing
    );
}

async fn requeue_case(backoff_from_now_s: u64) -> (Setup, TaskId) {
    let s = setup();
    let id = submit_and_claim(&s, "w-1");
    s.store
        .transition(
            &id,
            &[TaskState::Processing],
            TaskState::Retrying,
            TransitionPatch {
                failure_kind: Some(FailureKind::Network),
                backoff_until_ms: Some(s.clock.epoch_ms() + backoff_from_now_s * 1_000),
                clear_worker: true,
                ..Default::default()
            },
        )
        .unwrap();
    s.recovery.tick().await;
    (s, id)
}

#[tokio::test]
async fn elapsed_backoff_requeues() {
    let (s, id) = requeue_case(0).await;
    assert_eq!(s.store.get_task(id.as_str()).unwrap().state, TaskState::Pending);
}

#[tokio::test]
async fn pending_backoff_stays_retrying() {
    let (s, id) = requeue_case(600).await;
    assert_eq!(s.store.get_task(id.as_str()).unwrap().state, TaskState::Retrying);
}

#[tokio::test]
async fn probe_success_restores_availability() {
    let s = setup();
    s.arbiter.record_hit("rate limit").unwrap();
    s.agent.push_probe(Ok("ok"));

    // Not due yet: no probe happens.
    s.recovery.tick().await;
    assert_eq!(s.agent.probe_calls(), 0);

    s.clock.advance(std::time::Duration::from_secs(3_600));
    s.recovery.tick().await;
    assert_eq!(s.agent.probe_calls(), 1);
    assert!(s.arbiter.is_available());
}

#[tokio::test]
async fn probe_failure_extends_the_wait() {
    let s = setup();
    s.arbiter.record_hit("rate limit").unwrap();
    s.agent.push_probe(Err("still limited"));

    s.clock.advance(std::time::Duration::from_secs(3_600));
    s.recovery.tick().await;

    assert!(!s.arbiter.is_available());
    assert!(!s.arbiter.probe_due());
    assert_eq!(s.arbiter.state().consecutive_hits, 1);
}

#[tokio::test]
async fn probe_output_with_signature_counts_as_failure() {
    let s = setup();
    s.arbiter.record_hit("rate limit").unwrap();
    s.agent.push_probe(Ok("sorry, rate limit exceeded"));

    s.clock.advance(std::time::Duration::from_secs(3_600));
    s.recovery.tick().await;
    assert!(!s.arbiter.is_available());
}

#[tokio::test]
async fn resource_floor_halts_dispatch_and_recovers() {
    // A floor far above any real filesystem forces the low path.
    let mut config = Config::default();
    config.min_disk_space_gb = u64::MAX / (1024 * 1024 * 1024);
    let s = setup_with(config);

    s.recovery.tick().await;
    assert!(s.dispatch.is_resource_halted());
    assert!(s.dispatch.claim_filter(&s.store).is_none());
}

#[tokio::test]
async fn resource_recovery_resumes_dispatch() {
    let s = setup();
    // Default 5 GiB floor is normally met in CI; force-halt then verify
    // the sweep clears it.
    s.dispatch.set_resource_halted(true);
    s.recovery.tick().await;
    assert!(!s.dispatch.is_resource_halted());
}
