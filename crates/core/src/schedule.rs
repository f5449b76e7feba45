// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic submission schedules.
//!
//! Schedules live in the store and are mirrored into the user crontab,
//! one line per enabled schedule, tagged with a sentinel comment so the
//! managed block can be rewritten without touching foreign entries.

use crate::task::{Priority, TaskClass, TaskSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for a schedule entry.
    pub struct ScheduleId;
}

/// Sentinel prefix identifying crontab lines managed by taskd.
pub const SENTINEL_PREFIX: &str = "# AUTO_CLAUDE_TASK:";

/// A periodic submitter entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: ScheduleId,
    pub name: String,
    /// Standard five-field cron expression.
    pub cron_expr: String,
    pub description: String,
    pub class: TaskClass,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    pub enabled: bool,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at_ms: Option<u64>,
}

impl ScheduleRecord {
    /// Sentinel comment marking this entry in the crontab.
    pub fn sentinel(&self) -> String {
        format!(
            "{}{} - {} (created: {})",
            SENTINEL_PREFIX, self.id, self.name, self.created_at_ms
        )
    }

    /// The submission this schedule issues when it fires.
    pub fn to_spec(&self) -> TaskSpec {
        TaskSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            class: self.class,
            priority: self.priority,
            working_dir: self.working_dir.clone(),
            dedup_key: None,
            max_attempts: None,
        }
    }
}
