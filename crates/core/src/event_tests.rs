// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::task::{TaskClass, TaskSpec};

fn sample_task() -> Task {
    Task::from_spec_at(
        TaskId::new("t-1"),
        TaskSpec {
            name: "x".to_string(),
            description: "echo".to_string(),
            class: TaskClass::Light,
            priority: Default::default(),
            working_dir: None,
            dedup_key: None,
            max_attempts: None,
        },
        5,
        1000,
    )
}

#[test]
fn serializes_with_type_tag() {
    let event = Event::TaskClaimed {
        id: TaskId::new("t-1"),
        worker_id: WorkerId::new("w-1"),
        claim_token: "tok".to_string(),
        at_ms: 42,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "task:claimed");
    assert_eq!(json["id"], "t-1");
}

#[test]
fn round_trips_submission() {
    let event = Event::TaskSubmitted { task: sample_task() };
    let json = serde_json::to_string(&event).unwrap();
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn round_trips_transition_with_patch() {
    let event = Event::TaskTransitioned {
        id: TaskId::new("t-1"),
        from: TaskState::Processing,
        to: TaskState::Retrying,
        at_ms: 99,
        patch: TransitionPatch {
            failure_kind: Some(crate::task::FailureKind::Network),
            error: Some("connection reset".to_string()),
            backoff_until_ms: Some(5000),
            clear_worker: true,
            ..Default::default()
        },
    };
    let json = serde_json::to_string(&event).unwrap();
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn default_patch_fields_are_omitted() {
    let event = Event::TaskTransitioned {
        id: TaskId::new("t-1"),
        from: TaskState::Pending,
        to: TaskState::Processing,
        at_ms: 1,
        patch: TransitionPatch::default(),
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(!json.contains("clear_worker"));
    assert!(!json.contains("refund_attempt"));
}

#[test]
fn transition_without_patch_field_deserializes() {
    let json = r#"{"type":"task:transitioned","id":"t-1","from":"pending","to":"cancelled","at_ms":7}"#;
    let event: Event = serde_json::from_str(json).unwrap();
    match event {
        Event::TaskTransitioned { to, patch, .. } => {
            assert_eq!(to, TaskState::Cancelled);
            assert_eq!(patch, TransitionPatch::default());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn task_id_is_extracted_per_variant() {
    let event = Event::TaskDeleted { id: TaskId::new("t-9") };
    assert_eq!(event.task_id().map(|t| t.as_str()), Some("t-9"));

    let event = Event::WorkerStopped { id: WorkerId::new("w-1") };
    assert!(event.task_id().is_none());
}

#[test]
fn log_summary_is_short_and_tagged() {
    let event = Event::TaskTransitioned {
        id: TaskId::new("0123456789abcdef"),
        from: TaskState::Processing,
        to: TaskState::Completed,
        at_ms: 1,
        patch: TransitionPatch::default(),
    };
    let summary = event.log_summary();
    assert!(summary.starts_with("task:transitioned 01234567"));
    assert!(summary.contains("processing -> completed"));
}
