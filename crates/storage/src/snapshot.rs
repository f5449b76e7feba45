// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for crash recovery.
//!
//! Snapshots store the complete ledger at a point in time, identified
//! by the WAL sequence number and compressed with zstd. Recovery loads
//! the snapshot and replays WAL entries after that sequence.

use crate::Ledger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Bumped when the ledger layout changes incompatibly. A snapshot with
/// a different version is rotated to `.bak` and recovery starts from
/// the WAL alone.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A snapshot of the ledger at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// WAL sequence number at the time of snapshot
    pub seq: u64,
    pub ledger: Ledger,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Load a zstd-compressed snapshot if it exists.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, is corrupt, or has
    /// an incompatible version. Unusable snapshots are moved to a
    /// `.bak` file so recovery can proceed via WAL replay.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(path)?;
        let decoder = match zstd::stream::read::Decoder::new(file) {
            Ok(d) => d,
            Err(e) => {
                rotate_unusable(path, &format!("zstd error: {e}"));
                return Ok(None);
            }
        };
        let snapshot: Snapshot = match serde_json::from_reader(decoder) {
            Ok(s) => s,
            Err(e) => {
                rotate_unusable(path, &e.to_string());
                return Ok(None);
            }
        };

        if snapshot.version != CURRENT_SNAPSHOT_VERSION {
            rotate_unusable(
                path,
                &format!(
                    "version {} (current {})",
                    snapshot.version, CURRENT_SNAPSHOT_VERSION
                ),
            );
            return Ok(None);
        }

        Ok(Some(snapshot))
    }
}

fn rotate_unusable(path: &Path, reason: &str) {
    let bak_path = rotate_bak_path(path);
    warn!(
        path = %path.display(),
        bak = %bak_path.display(),
        reason,
        "Unusable snapshot, moving to .bak and recovering from WAL",
    );
    let _ = fs::rename(path, &bak_path);
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    // Remove the oldest if at capacity
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    // Shift existing backups up by one
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
