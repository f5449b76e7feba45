// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-crontab management for the periodic submitter.
//!
//! Each enabled schedule becomes a sentinel comment line followed by the
//! crontab entry that runs `taskctl submit …`. The managed block is
//! rewritten as a whole on every sync; foreign entries are preserved
//! byte-for-byte.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use taskd_core::schedule::{ScheduleRecord, SENTINEL_PREFIX};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::subprocess::{run_with_timeout, CRONTAB_TIMEOUT};

/// Errors from crontab operations.
#[derive(Debug, Error)]
pub enum CrontabError {
    #[error("crontab read failed: {0}")]
    ReadFailed(String),
    #[error("crontab write failed: {0}")]
    WriteFailed(String),
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidExpression { expr: String, reason: String },
}

/// Validate a standard five-field cron expression.
pub fn validate_expr(expr: &str) -> Result<(), CrontabError> {
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        return Err(CrontabError::InvalidExpression {
            expr: expr.to_string(),
            reason: format!("expected 5 fields, found {fields}"),
        });
    }
    // The cron crate parses six-field expressions (with seconds).
    cron::Schedule::from_str(&format!("0 {expr}")).map_err(|e| {
        CrontabError::InvalidExpression {
            expr: expr.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(())
}

/// Source of the user's crontab content.
#[async_trait]
pub trait CrontabSource: Clone + Send + Sync + 'static {
    async fn read(&self) -> Result<String, CrontabError>;
    async fn write(&self, content: &str) -> Result<(), CrontabError>;
}

/// Real crontab via crontab(1).
#[derive(Clone, Default)]
pub struct SystemCrontab;

#[async_trait]
impl CrontabSource for SystemCrontab {
    async fn read(&self) -> Result<String, CrontabError> {
        let mut cmd = Command::new("crontab");
        cmd.arg("-l");
        let output = run_with_timeout(cmd, CRONTAB_TIMEOUT, "crontab -l")
            .await
            .map_err(CrontabError::ReadFailed)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // "no crontab for <user>" is an empty crontab, not an error.
            if stderr.contains("no crontab") {
                Ok(String::new())
            } else {
                Err(CrontabError::ReadFailed(stderr.trim().to_string()))
            }
        }
    }

    async fn write(&self, content: &str) -> Result<(), CrontabError> {
        let mut child = Command::new("crontab")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CrontabError::WriteFailed(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .await
                .map_err(|e| CrontabError::WriteFailed(e.to_string()))?;
        }

        let output = tokio::time::timeout(CRONTAB_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| CrontabError::WriteFailed("crontab - timed out".to_string()))?
            .map_err(|e| CrontabError::WriteFailed(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CrontabError::WriteFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// In-memory crontab for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct FakeCrontab {
    content: Arc<Mutex<String>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeCrontab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(content: &str) -> Self {
        Self {
            content: Arc::new(Mutex::new(content.to_string())),
        }
    }

    pub fn content(&self) -> String {
        self.content.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl CrontabSource for FakeCrontab {
    async fn read(&self) -> Result<String, CrontabError> {
        Ok(self.content.lock().clone())
    }

    async fn write(&self, content: &str) -> Result<(), CrontabError> {
        *self.content.lock() = content.to_string();
        Ok(())
    }
}

/// Rewrites the managed block of the user crontab from schedule records.
#[derive(Clone)]
pub struct CrontabManager<S: CrontabSource> {
    source: S,
    /// Command prefix used in entries, e.g. "/usr/local/bin/taskctl".
    submit_command: String,
}

impl<S: CrontabSource> CrontabManager<S> {
    pub fn new(source: S, submit_command: impl Into<String>) -> Self {
        Self {
            source,
            submit_command: submit_command.into(),
        }
    }

    /// Rewrite the managed block to match the given schedules.
    pub async fn sync(&self, schedules: &[ScheduleRecord]) -> Result<(), CrontabError> {
        let current = self.source.read().await?;
        let mut next = strip_managed(&current);

        let block = render_block(schedules, &self.submit_command);
        if !block.is_empty() {
            if !next.is_empty() && !next.ends_with('\n') {
                next.push('\n');
            }
            next.push_str(&block);
        }

        self.source.write(&next).await
    }
}

/// Drop every sentinel line together with the entry line that follows it.
pub fn strip_managed(crontab: &str) -> String {
    let mut kept = Vec::new();
    let mut skip_next = false;
    for line in crontab.lines() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if line.trim_start().starts_with(SENTINEL_PREFIX) {
            skip_next = true;
            continue;
        }
        kept.push(line);
    }
    let mut result = kept.join("\n");
    if !result.is_empty() {
        result.push('\n');
    }
    result
}

/// Render the managed block: sentinel line + entry line per enabled schedule.
pub fn render_block(schedules: &[ScheduleRecord], submit_command: &str) -> String {
    let mut block = String::new();
    for schedule in schedules.iter().filter(|s| s.enabled) {
        block.push_str(&schedule.sentinel());
        block.push('\n');
        block.push_str(&render_entry(schedule, submit_command));
        block.push('\n');
    }
    block
}

fn render_entry(schedule: &ScheduleRecord, submit_command: &str) -> String {
    let mut entry = format!(
        "{} {} submit --name {} --description {} --class {} --priority {}",
        schedule.cron_expr,
        submit_command,
        shell_quote(&schedule.name),
        shell_quote(&schedule.description),
        schedule.class,
        schedule.priority,
    );
    if let Some(dir) = &schedule.working_dir {
        entry.push_str(&format!(" --working-dir {}", shell_quote(&dir.display().to_string())));
    }
    entry
}

/// Single-quote a shell argument.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
#[path = "crontab_tests.rs"]
mod tests;
