// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent CLI adapters.
//!
//! The `AgentCli` trait is the seam between the worker pool and the
//! external agent process: spawn an invocation, observe its output as a
//! stream of events, kill it through the returned handle. The fake
//! implementation scripts those streams for deterministic tests.

mod process;

pub use process::ProcessAgentCli;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeAgentCli, FakeRun};

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

/// Errors from agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
}

/// One agent CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    /// Program to execute (e.g. "claude").
    pub program: String,
    /// Fully rendered prompt, including any resume context.
    pub prompt: String,
    /// Tools the agent may use, per task class.
    pub tool_allowlist: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Events observed from a running agent subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// One line of stdout.
    Stdout(String),
    /// One line of stderr.
    Stderr(String),
    /// Process exited. Terminal; nothing follows.
    Exited { code: Option<i32> },
}

/// Handle to a running agent subprocess.
#[derive(Clone)]
pub struct AgentHandle {
    pub pid: Option<u32>,
    kill: Arc<Notify>,
}

impl AgentHandle {
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            kill: Arc::new(Notify::new()),
        }
    }

    /// Request teardown (SIGTERM → grace → SIGKILL).
    ///
    /// The driver still emits `Exited` once the process is gone.
    pub fn kill(&self) {
        self.kill.notify_one();
    }

    pub(crate) fn kill_requested(&self) -> Arc<Notify> {
        Arc::clone(&self.kill)
    }
}

/// Adapter over the external agent CLI.
#[async_trait]
pub trait AgentCli: Clone + Send + Sync + 'static {
    /// Spawn an invocation.
    ///
    /// Output lines and the final exit arrive on `events`; the stream
    /// always ends with exactly one `Exited`.
    async fn spawn(
        &self,
        invocation: AgentInvocation,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<AgentHandle, AgentError>;

    /// Minimal bounded invocation used to detect that a rate limit has
    /// lifted. Returns the combined output for signature checking.
    async fn probe(&self) -> Result<String, AgentError>;
}
