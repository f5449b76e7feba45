// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command scanning before dispatch.

use crate::patterns::PatternSet;
use taskd_core::ScanVerdict;

/// Classify a command against the block and review tables.
///
/// Blocked patterns win over review patterns; an allowed verdict means
/// neither table matched.
pub fn scan_command(patterns: &PatternSet, command: &str) -> ScanVerdict {
    let mut blocked = Vec::new();
    for pattern in &patterns.block {
        if pattern.regex.is_match(command) && !blocked.contains(&pattern.kind.to_string()) {
            blocked.push(pattern.kind.to_string());
        }
    }
    if !blocked.is_empty() {
        return ScanVerdict::Blocked { kinds: blocked };
    }

    let mut review = Vec::new();
    for pattern in &patterns.review {
        if pattern.regex.is_match(command) && !review.contains(&pattern.kind.to_string()) {
            review.push(pattern.kind.to_string());
        }
    }
    if !review.is_empty() {
        return ScanVerdict::NeedsReview { kinds: review };
    }

    ScanVerdict::Allowed
}

#[cfg(test)]
#[path = "scan_tests.rs"]
mod tests;
