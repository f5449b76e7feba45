// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed daemon configuration.
//!
//! One TOML record with every recognized option enumerated here.
//! Unknown keys are rejected at load so a typo fails fast instead of
//! silently falling back to a default.

use crate::task::TaskClass;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-class agent tool allow-lists. Must satisfy light ⊆ medium ⊆ heavy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClassAllowlist {
    pub light: Vec<String>,
    pub medium: Vec<String>,
    pub heavy: Vec<String>,
}

impl Default for ClassAllowlist {
    fn default() -> Self {
        let light = vec!["Read".to_string(), "Grep".to_string(), "Glob".to_string()];
        let mut medium = light.clone();
        medium.extend(["Edit".to_string(), "Write".to_string()]);
        let mut heavy = medium.clone();
        heavy.push("Bash".to_string());
        Self { light, medium, heavy }
    }
}

impl ClassAllowlist {
    pub fn for_class(&self, class: TaskClass) -> &[String] {
        match class {
            TaskClass::Light => &self.light,
            TaskClass::Medium => &self.medium,
            TaskClass::Heavy => &self.heavy,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let subset = |small: &[String], big: &[String]| small.iter().all(|t| big.contains(t));
        if !subset(&self.light, &self.medium) {
            return Err(ConfigError::Invalid(
                "class_tool_allowlist: light must be a subset of medium".to_string(),
            ));
        }
        if !subset(&self.medium, &self.heavy) {
            return Err(ConfigError::Invalid(
                "class_tool_allowlist: medium must be a subset of heavy".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-class concurrency caps at dispatch time. Zero means uncapped
/// (the pool size still bounds total concurrency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClassCaps {
    pub light: usize,
    pub medium: usize,
    pub heavy: usize,
}

impl Default for ClassCaps {
    fn default() -> Self {
        // Heavy tasks hold a subprocess for hours; one at a time.
        Self {
            light: 0,
            medium: 0,
            heavy: 1,
        }
    }
}

impl ClassCaps {
    pub fn for_class(&self, class: TaskClass) -> Option<usize> {
        let cap = match class {
            TaskClass::Light => self.light,
            TaskClass::Medium => self.medium,
            TaskClass::Heavy => self.heavy,
        };
        (cap > 0).then_some(cap)
    }
}

/// Per-class wall-clock timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClassTimeouts {
    pub light: u64,
    pub medium: u64,
    pub heavy: u64,
}

impl Default for ClassTimeouts {
    fn default() -> Self {
        Self {
            light: 900,
            medium: 3600,
            heavy: 14400,
        }
    }
}

impl ClassTimeouts {
    pub fn for_class(&self, class: TaskClass) -> Duration {
        let secs = match class {
            TaskClass::Light => self.light,
            TaskClass::Medium => self.medium,
            TaskClass::Heavy => self.heavy,
        };
        Duration::from_secs(secs)
    }
}

/// The daemon configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Logical session length used to clamp rate-limit backoff.
    pub session_limit_seconds: u64,
    /// Initial backoff after the first rate-limit hit.
    pub default_unban_wait_seconds: u64,
    pub rate_limit_backoff_multiplier: f64,
    /// Free-disk threshold below which new dispatch halts.
    pub min_disk_space_gb: u64,
    pub num_workers: usize,
    pub heartbeat_interval_seconds: u64,
    pub health_check_interval_seconds: u64,
    /// Per-attempt output cap; exceeding it kills the subprocess.
    pub max_output_size_bytes: u64,
    pub max_attempts: u32,
    /// Extra masking patterns, appended to the built-in set.
    pub sensitive_patterns: Vec<String>,
    pub class_tool_allowlist: ClassAllowlist,
    pub agent_program: String,
    pub metrics_port: u16,
    /// Lines of prior output carried as medium-class resume context.
    pub resume_context_lines: usize,
    /// Grace period before terminal tasks are purged by retention.
    pub retention_grace_seconds: u64,
    pub min_free_memory_mb: u64,
    pub class_timeout_seconds: ClassTimeouts,
    pub class_concurrency_caps: ClassCaps,
    /// Extra rate-limit signatures, appended to the built-in set.
    pub rate_limit_signatures: Vec<String>,
    /// Base backoff for retriable failures (doubles per attempt).
    pub retry_backoff_base_seconds: u64,
    pub subprocess_kill_grace_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_limit_seconds: 18_000,
            default_unban_wait_seconds: 3_600,
            rate_limit_backoff_multiplier: 1.5,
            min_disk_space_gb: 5,
            num_workers: 2,
            heartbeat_interval_seconds: 30,
            health_check_interval_seconds: 60,
            max_output_size_bytes: 50 * 1024 * 1024,
            max_attempts: 5,
            sensitive_patterns: Vec::new(),
            class_tool_allowlist: ClassAllowlist::default(),
            agent_program: "claude".to_string(),
            metrics_port: 8000,
            resume_context_lines: 500,
            retention_grace_seconds: 86_400,
            min_free_memory_mb: 512,
            class_timeout_seconds: ClassTimeouts::default(),
            class_concurrency_caps: ClassCaps::default(),
            rate_limit_signatures: Vec::new(),
            retry_backoff_base_seconds: 60,
            subprocess_kill_grace_seconds: 10,
        }
    }
}

impl Config {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "rate_limit_backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval_seconds == 0 || self.health_check_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat and health-check intervals must be non-zero".to_string(),
            ));
        }
        self.class_tool_allowlist.validate()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.subprocess_kill_grace_seconds)
    }

    pub fn timeout_for(&self, class: TaskClass) -> Duration {
        self.class_timeout_seconds.for_class(class)
    }

    pub fn allowlist_for(&self, class: TaskClass) -> &[String] {
        self.class_tool_allowlist.for_class(class)
    }

    /// A worker with no heartbeat for this long is declared dead.
    pub fn worker_dead_after(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds * 3)
    }

    pub fn min_disk_space_bytes(&self) -> u64 {
        self.min_disk_space_gb * 1024 * 1024 * 1024
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
