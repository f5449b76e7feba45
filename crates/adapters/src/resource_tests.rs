// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const MEMINFO_SAMPLE: &str = "\
MemTotal:       16384000 kB
MemFree:         1024000 kB
MemAvailable:    8192000 kB
Buffers:          512000 kB
";

#[test]
fn parses_mem_available_in_bytes() {
    assert_eq!(
        parse_mem_available(MEMINFO_SAMPLE),
        Some(8_192_000 * 1024)
    );
}

#[test]
fn missing_mem_available_is_none() {
    assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
}

#[test]
fn sample_reports_free_disk() {
    let dir = tempfile::tempdir().unwrap();
    let status = ResourceStatus::sample(dir.path()).unwrap();
    assert!(status.disk_free_bytes > 0);
}

#[test]
fn is_low_compares_against_floors() {
    let status = ResourceStatus {
        disk_free_bytes: 10 * 1024 * 1024 * 1024,
        mem_available_bytes: Some(2 * 1024 * 1024 * 1024),
    };
    assert!(!status.is_low(5 * 1024 * 1024 * 1024, 512 * 1024 * 1024));
    assert!(status.is_low(20 * 1024 * 1024 * 1024, 512 * 1024 * 1024));
    assert!(status.is_low(5 * 1024 * 1024 * 1024, 4 * 1024 * 1024 * 1024));
}

#[test]
fn unknown_memory_never_trips_the_floor() {
    let status = ResourceStatus {
        disk_free_bytes: u64::MAX,
        mem_available_bytes: None,
    };
    assert!(!status.is_low(0, u64::MAX));
}
