// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compiled pattern tables for scanning and masking.

use regex::Regex;
use taskd_core::Severity;
use thiserror::Error;

/// Errors from pattern compilation.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// A masking pattern with its finding metadata.
#[derive(Debug)]
pub struct MaskPattern {
    pub kind: &'static str,
    pub severity: Severity,
    pub regex: Regex,
}

/// A command pattern feeding scan verdicts.
#[derive(Debug)]
pub struct CommandPattern {
    pub kind: &'static str,
    pub regex: Regex,
}

/// All compiled pattern families.
///
/// Built-in sets cover the common sensitive-data and dangerous-command
/// families; `sensitive_patterns` from the configuration are appended
/// to the mask set.
#[derive(Debug)]
pub struct PatternSet {
    pub mask: Vec<MaskPattern>,
    pub block: Vec<CommandPattern>,
    pub review: Vec<CommandPattern>,
}

/// Sensitive-data patterns masked out of output and commands.
const MASK_PATTERNS: &[(&str, Severity, &str)] = &[
    (
        "email",
        Severity::Medium,
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
    ),
    (
        "api_key",
        Severity::Critical,
        r"(?:sk-ant-[A-Za-z0-9_\-]{10,}|sk-[A-Za-z0-9]{24,}|ghp_[A-Za-z0-9]{20,}|glpat-[A-Za-z0-9_\-]{16,}|xox[bp]-[A-Za-z0-9\-]{20,}|AKIA[A-Z0-9]{16})",
    ),
    (
        "base64_credential",
        Severity::High,
        r"\b[A-Za-z0-9+/]{48,}={0,2}\b",
    ),
    (
        "credit_card",
        Severity::High,
        r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b",
    ),
    (
        "phone",
        Severity::Low,
        r"(?:\+\d{1,3}[ -]?)?\(?\d{3}\)?[ -]\d{3}[ -]\d{4}\b",
    ),
];

/// Explicitly banned command patterns. A match blocks dispatch.
const BLOCK_PATTERNS: &[(&str, &str)] = &[
    ("destructive_fs", r"rm\s+(-[a-zA-Z]*\s+)*-[a-zA-Z]*[rf][a-zA-Z]*\s+(/|~)(\s|$)"),
    ("destructive_fs", r"\bmkfs(\.[a-z0-9]+)?\b"),
    ("destructive_fs", r"\bdd\s+[^|]*of=/dev/"),
    ("destructive_fs", r"\bshred\s+[^|]*/dev/"),
    ("fork_bomb", r":\(\)\s*\{"),
];

/// High-risk command patterns. A match holds the task for review.
const REVIEW_PATTERNS: &[(&str, &str)] = &[
    ("privilege_escalation", r"\bsudo\b|\bdoas\b|\bsu\s+-"),
    ("exfiltration", r"\b(curl|wget)\b[^|;]*\|\s*(ba|z|da)?sh\b"),
    ("destructive_chmod", r"\bchmod\s+(-[a-zA-Z]+\s+)*777\s+/"),
];

impl PatternSet {
    /// Compile the built-in families plus configured extras.
    pub fn compile(sensitive_patterns: &[String]) -> Result<Self, GateError> {
        let mut mask = Vec::new();
        for (kind, severity, pattern) in MASK_PATTERNS {
            mask.push(MaskPattern {
                kind,
                severity: *severity,
                regex: compile(pattern)?,
            });
        }
        for pattern in sensitive_patterns {
            mask.push(MaskPattern {
                kind: "configured",
                severity: Severity::High,
                regex: compile(pattern)?,
            });
        }

        let block = BLOCK_PATTERNS
            .iter()
            .map(|(kind, pattern)| {
                Ok(CommandPattern {
                    kind,
                    regex: compile(pattern)?,
                })
            })
            .collect::<Result<Vec<_>, GateError>>()?;

        let review = REVIEW_PATTERNS
            .iter()
            .map(|(kind, pattern)| {
                Ok(CommandPattern {
                    kind,
                    regex: compile(pattern)?,
                })
            })
            .collect::<Result<Vec<_>, GateError>>()?;

        Ok(Self { mask, block, review })
    }
}

fn compile(pattern: &str) -> Result<Regex, GateError> {
    Regex::new(pattern).map_err(|source| GateError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
