// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Security scan results and verdicts.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict of a command scan before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ScanVerdict {
    Allowed,
    /// High-risk patterns matched; held for operator review.
    NeedsReview { kinds: Vec<String> },
    /// Explicitly banned patterns matched.
    Blocked { kinds: Vec<String> },
}

impl ScanVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ScanVerdict::Allowed)
    }
}

/// Scan status recorded on the task itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityVerdict {
    #[default]
    Unscanned,
    Allowed,
    Blocked,
    /// Output masking replaced at least one sensitive span.
    Masked,
}

impl fmt::Display for SecurityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SecurityVerdict::Unscanned => "unscanned",
            SecurityVerdict::Allowed => "allowed",
            SecurityVerdict::Blocked => "blocked",
            SecurityVerdict::Masked => "masked",
        };
        write!(f, "{}", s)
    }
}

/// Finding severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One security finding, persisted for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub task_id: TaskId,
    /// Pattern family that matched (e.g. "email", "api_key", "destructive_fs").
    pub kind: String,
    /// Byte span of the match in the scanned text.
    pub span: (usize, usize),
    pub severity: Severity,
    /// Redacted replacement, when the finding came from masking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masked_value: Option<String>,
    pub at_ms: u64,
}
