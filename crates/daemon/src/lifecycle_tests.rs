// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use taskd_core::{Priority, TaskClass, TaskSpec, WorkerId};
use taskd_storage::ClaimFilter;

fn write_config(dir: &std::path::Path, content: &str) {
    std::fs::write(dir.join("config.toml"), content).unwrap();
}

#[tokio::test]
async fn startup_builds_the_layout_and_locks() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "num_workers = 0\n");

    let daemon = startup(dir.path().to_path_buf()).unwrap();
    assert!(dir.path().join("store").is_dir());
    assert!(dir.path().join("logs").is_dir());
    assert!(dir.path().join("taskd.lock").exists());

    // Second instance is refused while the lock is held.
    let err = startup(dir.path().to_path_buf()).map(|_| ()).unwrap_err();
    assert!(matches!(err, LifecycleError::LockFailed(_)));

    daemon.shutdown().await;
}

#[tokio::test]
async fn startup_rejects_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "definitely_not_an_option = 1\n");
    let err = startup(dir.path().to_path_buf()).map(|_| ()).unwrap_err();
    assert!(matches!(err, LifecycleError::Config(_)));
}

#[tokio::test]
async fn shutdown_requeues_interrupted_tasks_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "num_workers = 0\n");
    let daemon = startup(dir.path().to_path_buf()).unwrap();

    // Simulate a claim that never reported back.
    let id = daemon
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
    let worker = WorkerId::new("w-ghost");
    daemon.store.register_worker(&worker, 1).unwrap();
    daemon.store.claim(&worker, &ClaimFilter::all()).unwrap().unwrap();

    daemon.shutdown().await;
    assert!(dir.path().join("store/snapshot.zst").exists());

    // Restart sees the task pending with the attempt still counted.
    let daemon = startup(dir.path().to_path_buf()).unwrap();
    let task = daemon.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.attempt_count, 1);
    assert!(task.worker_id.is_none());
    daemon.shutdown().await;
}

#[tokio::test]
async fn state_survives_restart_via_snapshot_and_wal() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "num_workers = 0\n");

    let id = {
        let daemon = startup(dir.path().to_path_buf()).unwrap();
        let id = daemon
            .store
            .submit(TaskSpec {
                name: "persisted".to_string(),
                description: "do".to_string(),
                class: TaskClass::Medium,
                priority: Priority::High,
                working_dir: None,
                dedup_key: None,
                max_attempts: None,
            })
            .unwrap();
        daemon.shutdown().await;
        id
    };

    let daemon = startup(dir.path().to_path_buf()).unwrap();
    let task = daemon.store.get_task(id.as_str()).unwrap();
    assert_eq!(task.name, "persisted");
    assert_eq!(task.priority, Priority::High);
    daemon.shutdown().await;
}
