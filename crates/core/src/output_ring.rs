// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded ring over the masked tail of a task attempt's output.
//!
//! Appends are cheap and eviction happens from the front, on char
//! boundaries, so the ring always holds valid UTF-8. The ring is reset
//! when a new attempt starts.

use serde::{Deserialize, Serialize};

/// Default capacity. Large enough to carry the medium-class resume
/// context (500 lines of typical agent output) with room to spare.
pub const DEFAULT_RING_CAPACITY: usize = 64 * 1024;

/// Append-only bounded text buffer keeping the most recent bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRing {
    capacity: usize,
    buf: String,
}

impl Default for OutputRing {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }
}

impl OutputRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            buf: String::new(),
        }
    }

    /// Append text, evicting the oldest bytes past capacity.
    pub fn append(&mut self, text: &str) {
        if text.len() >= self.capacity {
            // Keep only the newest capacity bytes of the incoming text.
            let start = ceil_char_boundary(text, text.len() - self.capacity);
            self.buf.clear();
            self.buf.push_str(&text[start..]);
            return;
        }
        self.buf.push_str(text);
        if self.buf.len() > self.capacity {
            let excess = self.buf.len() - self.capacity;
            let start = ceil_char_boundary(&self.buf, excess);
            self.buf.drain(..start);
        }
    }

    /// The last `n` lines of the tail.
    pub fn tail_lines(&self, n: usize) -> Vec<&str> {
        let mut lines: Vec<&str> = self.buf.lines().rev().take(n).collect();
        lines.reverse();
        lines
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear the buffer for a fresh attempt. Capacity is retained.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Smallest index `>= i` that lands on a char boundary.
fn ceil_char_boundary(s: &str, i: usize) -> usize {
    let mut i = i.min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
#[path = "output_ring_tests.rs"]
mod tests;
