// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn alerts_append_as_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs/alerts.jsonl");
    let sink = AlertSink::new(&path);

    sink.alert(AlertLevel::P2, "disk_low", "free space below 5 GiB", 1_000);
    sink.alert(AlertLevel::P1, "internal", "invariant violated", 2_000);

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["code"], "disk_low");
    assert_eq!(lines[0]["level"], "p2");
    assert_eq!(lines[1]["level"], "p1");
    assert_eq!(lines[1]["at_ms"], 2_000);
}
