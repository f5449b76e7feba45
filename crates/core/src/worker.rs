// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker identity and heartbeat row.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a worker instance.
    pub struct WorkerId;
}

/// Heartbeat row announced by a live worker.
///
/// Workers are transient in-process tasks; this record is what the
/// recovery loop reconciles against the OS view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMeta {
    pub id: WorkerId,
    pub pid: u32,
    pub started_at_ms: u64,
    pub heartbeat_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<TaskId>,
    #[serde(default)]
    pub stopped: bool,
}
