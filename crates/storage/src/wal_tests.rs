// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write as _;
use taskd_core::{TaskId, WorkerId};

fn heartbeat_event(n: u64) -> Event {
    Event::WorkerHeartbeat {
        id: WorkerId::new("w-1"),
        task_id: Some(TaskId::new(format!("t-{n}"))),
        at_ms: n,
    }
}

#[test]
fn append_assigns_increasing_seqs() {
    let dir = tempfile::tempdir().unwrap();
    let mut wal = Wal::open(&dir.path().join("ledger.wal"), 0).unwrap();

    assert_eq!(wal.append(&heartbeat_event(1)).unwrap(), 1);
    assert_eq!(wal.append(&heartbeat_event(2)).unwrap(), 2);
    assert_eq!(wal.write_seq(), 2);
}

#[test]
fn entries_survive_reopen_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&heartbeat_event(1)).unwrap();
        wal.append(&heartbeat_event(2)).unwrap();
        wal.flush().unwrap();
    }

    let wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.write_seq(), 2);
    let entries = wal.entries_after(0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 1);
    assert_eq!(entries[1].event, heartbeat_event(2));
}

#[test]
fn unflushed_entries_are_not_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&heartbeat_event(1)).unwrap();
        // Dropped without flush
    }

    let wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.write_seq(), 0);
}

#[test]
fn entries_after_skips_older_seqs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.wal");
    let mut wal = Wal::open(&path, 0).unwrap();
    for n in 1..=5 {
        wal.append(&heartbeat_event(n)).unwrap();
    }
    wal.flush().unwrap();

    let entries = wal.entries_after(3).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 4);
}

#[test]
fn corrupt_tail_is_rotated_and_prefix_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&heartbeat_event(1)).unwrap();
        wal.append(&heartbeat_event(2)).unwrap();
        wal.flush().unwrap();
    }
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "{{not json").unwrap();
    }

    let wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.write_seq(), 2);
    assert_eq!(wal.entries_after(0).unwrap().len(), 2);
    assert!(path.with_extension("bak").exists());
}

#[test]
fn truncate_through_drops_checkpointed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.wal");
    let mut wal = Wal::open(&path, 0).unwrap();
    for n in 1..=4 {
        wal.append(&heartbeat_event(n)).unwrap();
    }
    wal.truncate_through(2).unwrap();

    let entries = wal.entries_after(0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 3);

    // Sequence numbering continues after truncation
    assert_eq!(wal.append(&heartbeat_event(5)).unwrap(), 5);
}

#[test]
fn min_seq_fast_forwards_an_empty_wal() {
    // After checkpoint + truncation + restart, the snapshot seq keeps
    // new entries ahead of what the snapshot already covers.
    let dir = tempfile::tempdir().unwrap();
    let mut wal = Wal::open(&dir.path().join("ledger.wal"), 10).unwrap();
    assert_eq!(wal.write_seq(), 10);
    assert_eq!(wal.append(&heartbeat_event(1)).unwrap(), 11);
    assert_eq!(wal.entries_after(10).unwrap().len(), 0);
    wal.flush().unwrap();
    assert_eq!(wal.entries_after(10).unwrap().len(), 1);
}

#[test]
fn blank_lines_are_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.wal");
    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&heartbeat_event(1)).unwrap();
        wal.flush().unwrap();
    }
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file).unwrap();
    }
    let wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.write_seq(), 1);
}
