// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate-limit availability record.

use serde::{Deserialize, Serialize};

/// Single-row record of agent service availability.
///
/// Written only by the arbiter; everyone else reads a monotonic view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub available: bool,
    /// Wall-clock deadline after which a probe may be attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Consecutive hits without a successful probe; drives the backoff.
    #[serde(default)]
    pub consecutive_hits: u32,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self {
            available: true,
            resume_at_ms: None,
            reason: None,
            consecutive_hits: 0,
        }
    }
}
