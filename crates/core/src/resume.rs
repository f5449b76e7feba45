// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Class-specific resume data carried across attempts.

use serde::{Deserialize, Serialize};

/// Status of a heavy-class chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    InProgress,
    Done,
}

/// One chunk of a heavy task's frozen progress record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: u32,
    pub status: ChunkStatus,
    /// Digest of the chunk announcement line, used to detect drift when
    /// a retry re-announces chunks.
    pub digest: String,
}

/// Resume payload, by class.
///
/// Light tasks carry no payload; a retry re-runs the original command.
/// Chunk boundaries for heavy tasks are determined by the first attempt
/// and frozen thereafter; later attempts only flip chunk status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeBlob {
    /// Tail of the previous attempt's masked output, prepended as
    /// context on the next invocation.
    Medium { tail_lines: Vec<String> },
    /// Ordered chunk table; retry resumes from the first chunk whose
    /// status is not `Done`.
    Heavy { chunks: Vec<ChunkRecord> },
}

impl ResumeBlob {
    /// First unfinished chunk of a heavy blob, if any.
    pub fn next_chunk(&self) -> Option<&ChunkRecord> {
        match self {
            ResumeBlob::Heavy { chunks } => {
                chunks.iter().find(|c| c.status != ChunkStatus::Done)
            }
            ResumeBlob::Medium { .. } => None,
        }
    }
}
