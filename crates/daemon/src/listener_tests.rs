// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::lifecycle;
use crate::protocol::StatusReport;
use taskd_core::{Priority, TaskClass, TaskSpec};
use tempfile::TempDir;

/// Boot a daemon with zero workers so no agent subprocess ever spawns.
fn boot() -> (Arc<Daemon>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.toml"), "num_workers = 0\n").unwrap();
    let daemon = lifecycle::startup(dir.path().to_path_buf()).unwrap();
    (Arc::new(daemon), dir)
}

fn spec(description: &str) -> TaskSpec {
    TaskSpec {
        name: "t".to_string(),
        description: description.to_string(),
        class: TaskClass::Light,
        priority: Priority::Normal,
        working_dir: None,
        dedup_key: None,
        max_attempts: None,
    }
}

fn submitted_id(response: &Response) -> TaskId {
    match response {
        Response::Submitted { id, .. } => id.clone(),
        other => panic!("expected Submitted, got {other:?}"),
    }
}

#[tokio::test]
async fn submit_then_get_round_trips() {
    let (daemon, _dir) = boot();

    let response = dispatch(&daemon, Request::Submit { spec: spec("echo hello") }).await;
    let id = submitted_id(&response);

    let response = dispatch(&daemon, Request::Get { id: id.to_string() }).await;
    match response {
        Response::Task { task, findings } => {
            assert_eq!(task.id, id);
            assert_eq!(task.state, TaskState::Pending);
            assert!(findings.is_empty());
        }
        other => panic!("expected Task, got {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn invalid_submission_maps_to_validation_error() {
    let (daemon, _dir) = boot();
    let response = dispatch(&daemon, Request::Submit { spec: spec("") }).await;
    match response {
        Response::Error { code, .. } => assert_eq!(code, ErrorCode::Validation),
        other => panic!("expected Error, got {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn blocked_submission_reports_verdict_and_finding() {
    let (daemon, _dir) = boot();
    let response = dispatch(&daemon, Request::Submit { spec: spec("rm -rf /") }).await;
    let id = match &response {
        Response::Submitted { id, verdict } => {
            assert!(matches!(verdict, taskd_core::ScanVerdict::Blocked { .. }));
            id.clone()
        }
        other => panic!("expected Submitted, got {other:?}"),
    };

    match dispatch(&daemon, Request::Get { id: id.to_string() }).await {
        Response::Task { task, findings } => {
            assert_eq!(task.state, TaskState::NeedsHumanReview);
            assert_eq!(findings.len(), 1);
            assert_eq!(findings[0].kind, "destructive_fs");
        }
        other => panic!("expected Task, got {other:?}"),
    }

    // Release puts it back in the queue with an operator override.
    let response = dispatch(&daemon, Request::Release { id: id.to_string() }).await;
    assert_eq!(response, Response::Ok);
    match dispatch(&daemon, Request::Get { id: id.to_string() }).await {
        Response::Task { task, .. } => assert_eq!(task.state, TaskState::Pending),
        other => panic!("expected Task, got {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn cancel_of_pending_task_never_ran() {
    let (daemon, _dir) = boot();
    let id = submitted_id(&dispatch(&daemon, Request::Submit { spec: spec("echo") }).await);

    assert_eq!(
        dispatch(&daemon, Request::Cancel { id: id.to_string() }).await,
        Response::Ok
    );
    match dispatch(&daemon, Request::Get { id: id.to_string() }).await {
        Response::Task { task, .. } => {
            assert_eq!(task.state, TaskState::Cancelled);
            assert_eq!(task.attempt_count, 0);
        }
        other => panic!("expected Task, got {other:?}"),
    }

    // Second cancel conflicts.
    match dispatch(&daemon, Request::Cancel { id: id.to_string() }).await {
        Response::Error { code, .. } => assert_eq!(code, ErrorCode::Conflict),
        other => panic!("expected Error, got {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn unknown_ids_map_to_not_found() {
    let (daemon, _dir) = boot();
    for request in [
        Request::Get { id: "missing".to_string() },
        Request::Cancel { id: "missing".to_string() },
        Request::Release { id: "missing".to_string() },
        Request::Pause { id: "missing".to_string() },
    ] {
        match dispatch(&daemon, request).await {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::NotFound),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn pause_requires_processing() {
    let (daemon, _dir) = boot();
    let id = submitted_id(&dispatch(&daemon, Request::Submit { spec: spec("echo") }).await);
    match dispatch(&daemon, Request::Pause { id: id.to_string() }).await {
        Response::Error { code, .. } => assert_eq!(code, ErrorCode::Conflict),
        other => panic!("expected Conflict, got {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn list_filters_by_state() {
    let (daemon, _dir) = boot();
    let keep = submitted_id(&dispatch(&daemon, Request::Submit { spec: spec("one") }).await);
    let gone = submitted_id(&dispatch(&daemon, Request::Submit { spec: spec("two") }).await);
    dispatch(&daemon, Request::Cancel { id: gone.to_string() }).await;

    match dispatch(&daemon, Request::List { state: Some(TaskState::Pending) }).await {
        Response::Tasks { tasks } => {
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].id, keep);
        }
        other => panic!("expected Tasks, got {other:?}"),
    }

    match dispatch(&daemon, Request::List { state: None }).await {
        Response::Tasks { tasks } => assert_eq!(tasks.len(), 2),
        other => panic!("expected Tasks, got {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn status_reports_counts_and_rate_limit() {
    let (daemon, _dir) = boot();
    dispatch(&daemon, Request::Submit { spec: spec("echo") }).await;

    match dispatch(&daemon, Request::Status).await {
        Response::Status { report } => {
            let StatusReport {
                counts, rate_limit, ..
            } = *report;
            assert_eq!(counts.get(&TaskState::Pending), Some(&1));
            assert!(rate_limit.available);
        }
        other => panic!("expected Status, got {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn shutdown_request_flips_the_signal() {
    let (daemon, _dir) = boot();
    let mut signal = daemon.shutdown_signal();
    assert!(!*signal.borrow());

    assert_eq!(dispatch(&daemon, Request::Shutdown).await, Response::Ok);
    signal.changed().await.unwrap();
    assert!(*signal.borrow());
    daemon.shutdown().await;
}
