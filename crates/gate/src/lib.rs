// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taskd-gate: content-safety scanning and masking.
//!
//! The gate is a pure function over text plus a small append-only audit
//! sink. It never blocks retroactively: a task already dispatched is not
//! killed by later findings; they are recorded and surfaced to the
//! recovery loop.

pub mod audit;
pub mod classify;
pub mod mask;
pub mod patterns;
pub mod scan;

pub use audit::AuditLog;
pub use classify::Classifier;
pub use mask::MaskHit;
pub use patterns::{GateError, PatternSet};

use taskd_core::{Config, FailureKind, ScanVerdict};

/// Compiled security gate.
///
/// Construct once at boot from the configuration; cheap to clone and
/// share across workers.
#[derive(Clone)]
pub struct Gate {
    patterns: std::sync::Arc<PatternSet>,
    classifier: std::sync::Arc<Classifier>,
}

impl Gate {
    pub fn from_config(config: &Config) -> Result<Self, GateError> {
        Ok(Self {
            patterns: std::sync::Arc::new(PatternSet::compile(&config.sensitive_patterns)?),
            classifier: std::sync::Arc::new(Classifier::compile(&config.rate_limit_signatures)?),
        })
    }

    /// Classify a command before dispatch.
    pub fn scan_command(&self, command: &str) -> ScanVerdict {
        scan::scan_command(&self.patterns, command)
    }

    /// Replace sensitive spans with stable redaction tokens.
    ///
    /// Idempotent: applying twice equals applying once.
    pub fn mask(&self, text: &str) -> (String, Vec<MaskHit>) {
        mask::mask(&self.patterns, text)
    }

    /// Tag subprocess error output with a failure kind.
    pub fn classify(&self, error_text: &str) -> FailureKind {
        self.classifier.classify(error_text)
    }

    /// The rate-limit signature matched by this output line, if any.
    pub fn rate_limit_signature(&self, line: &str) -> Option<String> {
        self.classifier.rate_limit_signature(line)
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
