// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-class resume payloads and invocation assembly.
//!
//! Light tasks restart from scratch. Medium tasks get the tail of the
//! previous attempt prepended as context. Heavy tasks carry a chunk
//! table frozen at first execution; retries resume from the first
//! unfinished chunk.

use sha2::{Digest, Sha256};
use taskd_adapters::AgentInvocation;
use taskd_core::{ChunkRecord, ChunkStatus, Config, ResumeBlob, Task, TaskClass};

/// Build the agent invocation for the next attempt of `task`.
pub fn build_invocation(task: &Task, config: &Config, working_dir: std::path::PathBuf) -> AgentInvocation {
    AgentInvocation {
        program: config.agent_program.clone(),
        prompt: compose_prompt(task),
        tool_allowlist: config.allowlist_for(task.class).to_vec(),
        working_dir,
        env: Vec::new(),
    }
}

/// Render the prompt, layering resume context onto the stable command.
pub fn compose_prompt(task: &Task) -> String {
    match (&task.class, &task.resume_blob) {
        (TaskClass::Medium, Some(ResumeBlob::Medium { tail_lines })) if !tail_lines.is_empty() => {
            format!(
                "Output tail of the previous attempt, for context:\n```\n{}\n```\n\n{}",
                tail_lines.join("\n"),
                task.command
            )
        }
        (TaskClass::Heavy, Some(blob @ ResumeBlob::Heavy { chunks })) if !chunks.is_empty() => {
            let done: Vec<String> = chunks
                .iter()
                .filter(|c| c.status == ChunkStatus::Done)
                .map(|c| c.chunk_id.to_string())
                .collect();
            match blob.next_chunk() {
                Some(next) if !done.is_empty() => format!(
                    "{}\n\nChunks {} are already done; do not redo them. \
                     Resume from chunk {}.",
                    task.command,
                    done.join(", "),
                    next.chunk_id
                ),
                Some(next) => {
                    format!("{}\n\nResume from chunk {}.", task.command, next.chunk_id)
                }
                // Every chunk done; re-run is a verification pass.
                None => task.command.clone(),
            }
        }
        _ => task.command.clone(),
    }
}

/// Medium-class payload from the masked output tail.
pub fn medium_blob(tail: &taskd_core::OutputRing, context_lines: usize) -> Option<ResumeBlob> {
    let lines: Vec<String> = tail
        .tail_lines(context_lines)
        .into_iter()
        .map(|l| l.to_string())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(ResumeBlob::Medium { tail_lines: lines })
    }
}

/// Tracks heavy-task chunk announcements in streamed output.
///
/// Boundaries are frozen on the first attempt: once a blob exists, new
/// chunk ids in later attempts are ignored and only status changes for
/// known chunks are applied.
pub struct ChunkTracker {
    frozen: bool,
    chunks: Vec<ChunkRecord>,
    dirty: bool,
}

impl ChunkTracker {
    pub fn from_blob(blob: Option<&ResumeBlob>) -> Self {
        match blob {
            Some(ResumeBlob::Heavy { chunks }) => Self {
                frozen: true,
                chunks: chunks.clone(),
                dirty: false,
            },
            _ => Self {
                frozen: false,
                chunks: Vec::new(),
                dirty: false,
            },
        }
    }

    /// Observe one output line. Returns true when the table changed.
    pub fn observe_line(&mut self, line: &str) -> bool {
        let Some((chunk_id, rest)) = parse_chunk_marker(line) else {
            return false;
        };

        let changed = if rest.trim().eq_ignore_ascii_case("done") {
            self.mark(chunk_id, ChunkStatus::Done)
        } else if self.frozen {
            // Known chunk re-announced on a retry.
            self.mark(chunk_id, ChunkStatus::InProgress)
        } else if self.chunks.iter().all(|c| c.chunk_id != chunk_id) {
            self.chunks.push(ChunkRecord {
                chunk_id,
                status: ChunkStatus::InProgress,
                digest: digest_line(line),
            });
            true
        } else {
            self.mark(chunk_id, ChunkStatus::InProgress)
        };

        self.dirty |= changed;
        changed
    }

    fn mark(&mut self, chunk_id: u32, status: ChunkStatus) -> bool {
        for chunk in &mut self.chunks {
            if chunk.chunk_id == chunk_id && chunk.status != status {
                // Done is sticky: a retry re-announcing a finished chunk
                // does not reopen it.
                if chunk.status == ChunkStatus::Done {
                    return false;
                }
                chunk.status = status;
                return true;
            }
        }
        false
    }

    pub fn to_blob(&self) -> Option<ResumeBlob> {
        if self.chunks.is_empty() {
            None
        } else {
            Some(ResumeBlob::Heavy {
                chunks: self.chunks.clone(),
            })
        }
    }

    /// Whether anything changed since the last `take_dirty`.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

/// Parse `chunk <n>: <rest>` markers (case-insensitive prefix).
fn parse_chunk_marker(line: &str) -> Option<(u32, &str)> {
    let trimmed = line.trim();
    let lower = trimmed.to_ascii_lowercase();
    let rest = lower.strip_prefix("chunk ")?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 || !rest[digits_end..].starts_with(':') {
        return None;
    }
    let chunk_id: u32 = rest[..digits_end].parse().ok()?;
    // Offset into the original (untouched-case) string: "chunk " + digits + ":".
    let tail_start = "chunk ".len() + digits_end + 1;
    Some((chunk_id, &trimmed[tail_start..]))
}

fn digest_line(line: &str) -> String {
    let digest = Sha256::digest(line.trim().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

#[cfg(test)]
#[path = "resume_tests.rs"]
mod tests;
