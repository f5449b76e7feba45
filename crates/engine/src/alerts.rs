// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operational alert sink (`logs/alerts.jsonl`).

use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Alert priority. P1 pages someone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    P1,
    P2,
    P3,
}

#[derive(Serialize)]
struct AlertRecord<'a> {
    at_ms: u64,
    level: AlertLevel,
    code: &'a str,
    message: &'a str,
}

/// Append-only JSONL alert log.
#[derive(Clone)]
pub struct AlertSink {
    path: PathBuf,
    file: Arc<Mutex<Option<File>>>,
}

impl AlertSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Arc::new(Mutex::new(None)),
        }
    }

    /// Emit an alert. Also mirrored to tracing at warn/error level.
    pub fn alert(&self, level: AlertLevel, code: &str, message: &str, at_ms: u64) {
        match level {
            AlertLevel::P1 => tracing::error!(code, message, "alert"),
            _ => warn!(code, message, "alert"),
        }

        let record = AlertRecord {
            at_ms,
            level,
            code,
            message,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(_) => return,
        };

        let mut guard = self.file.lock();
        if guard.is_none() {
            *guard = self.open();
        }
        let Some(file) = guard.as_mut() else { return };
        if writeln!(file, "{}", line).is_err() {
            *guard = None;
        }
    }

    fn open(&self) -> Option<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .ok()
    }
}

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;
