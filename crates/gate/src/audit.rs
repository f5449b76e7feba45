// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only security audit sink.
//!
//! One JSON line per record. Sink failures are logged and swallowed so
//! auditing never blocks the worker path.

use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskd_core::{ScanVerdict, SecurityFinding, TaskId};
use tracing::warn;

#[derive(Serialize)]
struct AuditRecord<'a> {
    at_ms: u64,
    entry: &'a str,
    task_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    finding: Option<&'a SecurityFinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verdict: Option<&'a ScanVerdict>,
}

/// Append-only JSONL audit log (`logs/security_audit.log`).
#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
    file: Arc<Mutex<Option<File>>>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Arc::new(Mutex::new(None)),
        }
    }

    /// Record a masking or scan finding.
    pub fn record_finding(&self, finding: &SecurityFinding, at_ms: u64) {
        self.write(&AuditRecord {
            at_ms,
            entry: "finding",
            task_id: finding.task_id.as_str(),
            finding: Some(finding),
            verdict: None,
        });
    }

    /// Record a command scan verdict.
    pub fn record_verdict(&self, task_id: &TaskId, verdict: &ScanVerdict, at_ms: u64) {
        self.write(&AuditRecord {
            at_ms,
            entry: "verdict",
            task_id: task_id.as_str(),
            finding: None,
            verdict: Some(verdict),
        });
    }

    fn write<T: Serialize>(&self, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize audit record");
                return;
            }
        };

        let mut guard = self.file.lock();
        if guard.is_none() {
            *guard = self.open();
        }
        let Some(file) = guard.as_mut() else { return };
        if let Err(e) = writeln!(file, "{}", line) {
            warn!(error = %e, path = %self.path.display(), "failed to append audit record");
            // Force a reopen on the next record.
            *guard = None;
        }
    }

    fn open(&self) -> Option<File> {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create audit log directory");
                return None;
            }
        }
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "failed to open audit log");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
