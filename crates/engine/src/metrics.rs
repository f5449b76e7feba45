// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process metric registry with Prometheus text exposition.
//!
//! Counters are bumped by the orchestrator; gauges are computed from
//! the ledger at render time, so the exposition is always consistent
//! with the store.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use taskd_core::{Clock, IdGen, TaskState};
use taskd_storage::Store;

struct MetricsInner {
    /// task_runs_total{status}
    task_runs: Mutex<BTreeMap<String, u64>>,
    disk_free_bytes: AtomicU64,
}

/// Shared metric registry.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                task_runs: Mutex::new(BTreeMap::new()),
                disk_free_bytes: AtomicU64::new(0),
            }),
        }
    }

    /// Count a task-run outcome (terminal or retry decision).
    pub fn incr_task_run(&self, status: &str) {
        let mut runs = self.inner.task_runs.lock();
        *runs.entry(status.to_string()).or_insert(0) += 1;
    }

    pub fn task_runs(&self, status: &str) -> u64 {
        self.inner.task_runs.lock().get(status).copied().unwrap_or(0)
    }

    /// Updated by the recovery loop's resource sweep.
    pub fn set_disk_free_bytes(&self, bytes: u64) {
        self.inner.disk_free_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Render the Prometheus text exposition.
    pub fn render<C: Clock, G: IdGen>(&self, store: &Store<C, G>, now_ms: u64) -> String {
        let mut out = String::with_capacity(1024);

        out.push_str("# HELP task_runs_total Task run outcomes.\n");
        out.push_str("# TYPE task_runs_total counter\n");
        {
            let runs = self.inner.task_runs.lock();
            for (status, count) in runs.iter() {
                let _ = writeln!(out, "task_runs_total{{status=\"{status}\"}} {count}");
            }
        }

        out.push_str("# HELP queue_tasks_total Tasks per state.\n");
        out.push_str("# TYPE queue_tasks_total gauge\n");
        let counts = store.counts_by_state();
        for state in TaskState::all() {
            let count = counts.get(&state).copied().unwrap_or(0);
            let _ = writeln!(out, "queue_tasks_total{{state=\"{state}\"}} {count}");
        }

        out.push_str("# HELP worker_heartbeat_age_seconds Seconds since each worker's heartbeat.\n");
        out.push_str("# TYPE worker_heartbeat_age_seconds gauge\n");
        let mut workers = store.workers();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        for worker in workers.iter().filter(|w| !w.stopped) {
            let age = now_ms.saturating_sub(worker.heartbeat_at_ms) / 1_000;
            let _ = writeln!(
                out,
                "worker_heartbeat_age_seconds{{worker_id=\"{}\"}} {age}",
                worker.id
            );
        }

        out.push_str("# HELP system_disk_free_bytes Free bytes on the state filesystem.\n");
        out.push_str("# TYPE system_disk_free_bytes gauge\n");
        let _ = writeln!(
            out,
            "system_disk_free_bytes {}",
            self.inner.disk_free_bytes.load(Ordering::Relaxed)
        );

        out.push_str("# HELP rate_limit_available Agent availability (1 = available).\n");
        out.push_str("# TYPE rate_limit_available gauge\n");
        let available = if store.rate_limit().available { 1 } else { 0 };
        let _ = writeln!(out, "rate_limit_available {available}");

        out.push_str("# HELP taskd_build_info Build metadata.\n");
        out.push_str("# TYPE taskd_build_info gauge\n");
        let _ = writeln!(
            out,
            "taskd_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        );

        out
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
