// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

use crate::lifecycle::LifecycleError;

/// Resolve state directory: TASKD_STATE_DIR > XDG_STATE_HOME/taskd > ~/.local/state/taskd
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("TASKD_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("taskd"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/taskd"))
}

/// Path of the `taskctl` binary installed into crontab entries.
pub fn taskctl_path() -> String {
    std::env::var("TASKD_TASKCTL").unwrap_or_else(|_| "taskctl".to_string())
}
