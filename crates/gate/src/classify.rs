// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess error classification.

use crate::patterns::GateError;
use regex::{Regex, RegexBuilder};
use taskd_core::FailureKind;

/// Built-in rate-limit signatures; extended by configuration.
const RATE_LIMIT_SIGNATURES: &[&str] = &[
    r"rate limit",
    r"too many requests",
    r"quota exceeded",
    r"usage limit reached",
    r"\b429\b",
];

const NETWORK_SIGNATURES: &[&str] = &[
    r"connection (reset|refused|closed)",
    r"network is unreachable",
    r"no internet",
    r"temporary failure in name resolution",
    r"tls handshake",
    r"dns (error|failure)",
];

const RESOURCE_SIGNATURES: &[&str] = &[
    r"no space left on device",
    r"disk (is )?full",
    r"out of memory",
    r"cannot allocate memory",
    r"permission denied",
    r"read-only file system",
];

/// Compiled error classifier.
///
/// Classification semantics are fixed; the signature set itself is
/// configuration-driven.
pub struct Classifier {
    rate_limit: Vec<Regex>,
    network: Vec<Regex>,
    resource: Vec<Regex>,
}

impl Classifier {
    pub fn compile(extra_rate_limit: &[String]) -> Result<Self, GateError> {
        let mut rate_limit = compile_all(RATE_LIMIT_SIGNATURES)?;
        for pattern in extra_rate_limit {
            rate_limit.push(compile(pattern)?);
        }
        Ok(Self {
            rate_limit,
            network: compile_all(NETWORK_SIGNATURES)?,
            resource: compile_all(RESOURCE_SIGNATURES)?,
        })
    }

    /// Tag error output with a failure kind.
    ///
    /// Rate-limit wins over the other families; an unmatched error is a
    /// plain process crash.
    pub fn classify(&self, error_text: &str) -> FailureKind {
        if self.rate_limit.iter().any(|r| r.is_match(error_text)) {
            return FailureKind::RateLimited;
        }
        if self.resource.iter().any(|r| r.is_match(error_text)) {
            return FailureKind::Resource;
        }
        if self.network.iter().any(|r| r.is_match(error_text)) {
            return FailureKind::Network;
        }
        FailureKind::ProcessCrash
    }

    /// The rate-limit signature matched by this line, if any.
    pub fn rate_limit_signature(&self, line: &str) -> Option<String> {
        for regex in &self.rate_limit {
            if let Some(found) = regex.find(line) {
                return Some(found.as_str().to_string());
            }
        }
        None
    }
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>, GateError> {
    patterns.iter().map(|p| compile(p)).collect()
}

fn compile(pattern: &str) -> Result<Regex, GateError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| GateError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
