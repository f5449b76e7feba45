// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sensitive-data masking.
//!
//! Each match is replaced with a stable token carrying the last four
//! characters for disambiguation: `[MASKED:xxxx]`. The token never
//! re-matches any pattern, so masking is idempotent.

use crate::patterns::PatternSet;
use std::borrow::Cow;
use taskd_core::Severity;

/// Fixed sentinel prefixing every redaction token.
pub const MASK_SENTINEL: &str = "[MASKED:";

/// One replaced span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskHit {
    pub kind: String,
    pub severity: Severity,
    /// Byte span of the match in the text as seen by its pattern pass.
    pub span: (usize, usize),
    pub replacement: String,
}

/// Replacing a span can merge the token tail with following text into a
/// fresh match ("a@b.cc@d.ee" leaves "@d.ee" dangling), so each pattern
/// iterates to a fixpoint. Bounded: every real replacement consumes
/// matchable material.
const MAX_MASK_PASSES: usize = 8;

/// Replace every sensitive span in `text`.
///
/// Patterns are applied in table order over the evolving text; spans in
/// the returned hits refer to the input of the pass that produced them.
pub fn mask(patterns: &PatternSet, text: &str) -> (String, Vec<MaskHit>) {
    let mut current = text.to_string();
    let mut hits = Vec::new();

    for pattern in &patterns.mask {
        for _ in 0..MAX_MASK_PASSES {
            let mut pass_hits = Vec::new();
            let replaced = pattern.regex.replace_all(&current, |caps: &regex::Captures<'_>| {
                let matched = match caps.get(0) {
                    Some(m) => m,
                    None => return String::new(),
                };
                // Never re-mask an existing token (or text overlapping one).
                if matched.as_str().contains(MASK_SENTINEL) {
                    return matched.as_str().to_string();
                }
                let replacement = redaction_token(matched.as_str());
                pass_hits.push(MaskHit {
                    kind: pattern.kind.to_string(),
                    severity: pattern.severity,
                    span: (matched.start(), matched.end()),
                    replacement: replacement.clone(),
                });
                replacement
            });
            if pass_hits.is_empty() {
                break;
            }
            if let Cow::Owned(new_text) = replaced {
                current = new_text;
            }
            hits.extend(pass_hits);
        }
    }

    (current, hits)
}

/// Stable redaction token keeping the last four characters.
fn redaction_token(matched: &str) -> String {
    let tail: String = {
        let chars: Vec<char> = matched.chars().collect();
        chars[chars.len().saturating_sub(4)..].iter().collect()
    };
    format!("{}{}]", MASK_SENTINEL, tail)
}

#[cfg(test)]
#[path = "mask_tests.rs"]
mod tests;
