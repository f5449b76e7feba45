// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use taskd_core::{FakeClock, Priority, SequentialIdGen, TaskSpec, WorkerId};
use tempfile::TempDir;

type TestStore = Store<FakeClock, SequentialIdGen>;

fn setup() -> (TestStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(
        &dir.path().join("ledger.wal"),
        &dir.path().join("snapshot.zst"),
        FakeClock::new(),
        SequentialIdGen::new("x"),
        5,
    )
    .unwrap();
    (store, dir)
}

fn submit(store: &TestStore, class: TaskClass) -> taskd_core::TaskId {
    store
        .submit(TaskSpec {
            name: "t".to_string(),
            description: "do".to_string(),
            class,
            priority: Priority::Normal,
            working_dir: None,
            dedup_key: None,
            max_attempts: None,
        })
        .unwrap()
}

#[test]
fn all_classes_pass_when_idle() {
    let (store, _dir) = setup();
    let gate = DispatchGate::new(&Config::default());
    let filter = gate.claim_filter(&store).unwrap();
    assert_eq!(filter.classes.len(), 3);
}

#[test]
fn resource_halt_blocks_all_dispatch() {
    let (store, _dir) = setup();
    let gate = DispatchGate::new(&Config::default());
    gate.set_resource_halted(true);
    assert!(gate.claim_filter(&store).is_none());

    gate.set_resource_halted(false);
    assert!(gate.claim_filter(&store).is_some());
}

#[test]
fn heavy_cap_excludes_heavy_while_one_runs() {
    let (store, _dir) = setup();
    // Default caps: heavy capped at 1.
    let gate = DispatchGate::new(&Config::default());

    submit(&store, TaskClass::Heavy);
    let filter = gate.claim_filter(&store).unwrap();
    store.claim(&WorkerId::new("w-1"), &filter).unwrap().unwrap();

    let filter = gate.claim_filter(&store).unwrap();
    assert!(!filter.classes.contains(&TaskClass::Heavy));
    assert!(filter.classes.contains(&TaskClass::Light));
}

#[test]
fn zero_cap_means_uncapped() {
    let (store, _dir) = setup();
    let gate = DispatchGate::new(&Config::default());

    for _ in 0..4 {
        submit(&store, TaskClass::Light);
    }
    for n in 0..4 {
        let filter = gate.claim_filter(&store).unwrap();
        assert!(filter.classes.contains(&TaskClass::Light), "claim {n}");
        store
            .claim(&WorkerId::new(format!("w-{n}")), &filter)
            .unwrap()
            .unwrap();
    }
}
