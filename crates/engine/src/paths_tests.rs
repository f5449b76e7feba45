// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn layout_matches_documented_tree() {
    let paths = StatePaths::new("/var/lib/taskd");
    assert_eq!(paths.wal(), PathBuf::from("/var/lib/taskd/store/ledger.wal"));
    assert_eq!(paths.snapshot(), PathBuf::from("/var/lib/taskd/store/snapshot.zst"));
    let id = TaskId::new("t-1");
    assert_eq!(paths.output_log(&id), PathBuf::from("/var/lib/taskd/tasks/t-1/output.log"));
    assert_eq!(paths.resume_blob(&id), PathBuf::from("/var/lib/taskd/tasks/t-1/resume.blob"));
    assert_eq!(paths.alerts_log(), PathBuf::from("/var/lib/taskd/logs/alerts.jsonl"));
}

#[test]
fn ensure_layout_creates_directories() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StatePaths::new(dir.path());
    paths.ensure_layout().unwrap();
    assert!(dir.path().join("store").is_dir());
    assert!(dir.path().join("tasks").is_dir());
    assert!(dir.path().join("logs").is_dir());
    assert!(dir.path().join("queue").is_dir());
    assert!(dir.path().join("snapshots").is_dir());
}

#[test]
fn remove_task_dir_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StatePaths::new(dir.path());
    let id = TaskId::new("t-1");
    std::fs::create_dir_all(paths.task_dir(&id)).unwrap();
    paths.remove_task_dir(&id).unwrap();
    paths.remove_task_dir(&id).unwrap();
    assert!(!paths.task_dir(&id).exists());
}
