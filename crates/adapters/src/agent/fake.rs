// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake agent adapter for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{AgentCli, AgentError, AgentEvent, AgentHandle, AgentInvocation};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Scripted behavior for one fake agent run.
#[derive(Debug, Clone)]
pub struct FakeRun {
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub exit_code: Option<i32>,
    /// Emit the lines, then stay alive until killed.
    pub hang: bool,
}

impl FakeRun {
    pub fn success(lines: &[&str]) -> Self {
        Self {
            stdout_lines: lines.iter().map(|l| l.to_string()).collect(),
            stderr_lines: Vec::new(),
            exit_code: Some(0),
            hang: false,
        }
    }

    pub fn failure(stderr: &[&str], exit_code: i32) -> Self {
        Self {
            stdout_lines: Vec::new(),
            stderr_lines: stderr.iter().map(|l| l.to_string()).collect(),
            exit_code: Some(exit_code),
            hang: false,
        }
    }

    pub fn hanging(lines: &[&str]) -> Self {
        Self {
            stdout_lines: lines.iter().map(|l| l.to_string()).collect(),
            stderr_lines: Vec::new(),
            exit_code: None,
            hang: true,
        }
    }
}

struct FakeState {
    runs: VecDeque<FakeRun>,
    invocations: Vec<AgentInvocation>,
    probe_results: VecDeque<Result<String, String>>,
    probe_calls: usize,
}

/// Fake agent CLI: scripted runs, recorded invocations.
#[derive(Clone)]
pub struct FakeAgentCli {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakeAgentCli {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAgentCli {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                runs: VecDeque::new(),
                invocations: Vec::new(),
                probe_results: VecDeque::new(),
                probe_calls: 0,
            })),
        }
    }

    /// Queue the behavior for the next spawn. Unqueued spawns succeed
    /// with a single "ok" line.
    pub fn push_run(&self, run: FakeRun) {
        self.inner.lock().runs.push_back(run);
    }

    /// Queue the result of the next probe. Unqueued probes succeed.
    pub fn push_probe(&self, result: Result<&str, &str>) {
        self.inner.lock().probe_results.push_back(
            result
                .map(|s| s.to_string())
                .map_err(|s| s.to_string()),
        );
    }

    /// All invocations spawned so far.
    pub fn invocations(&self) -> Vec<AgentInvocation> {
        self.inner.lock().invocations.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.inner.lock().invocations.len()
    }

    pub fn probe_calls(&self) -> usize {
        self.inner.lock().probe_calls
    }
}

#[async_trait]
impl AgentCli for FakeAgentCli {
    async fn spawn(
        &self,
        invocation: AgentInvocation,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<AgentHandle, AgentError> {
        let run = {
            let mut inner = self.inner.lock();
            inner.invocations.push(invocation);
            inner
                .runs
                .pop_front()
                .unwrap_or_else(|| FakeRun::success(&["ok"]))
        };

        let handle = AgentHandle::new(Some(99_999));
        let kill = handle.kill_requested();

        tokio::spawn(async move {
            for line in run.stdout_lines {
                if events.send(AgentEvent::Stdout(line)).await.is_err() {
                    return;
                }
            }
            for line in run.stderr_lines {
                if events.send(AgentEvent::Stderr(line)).await.is_err() {
                    return;
                }
            }
            let code = if run.hang {
                // Stay alive until the worker kills us.
                kill.notified().await;
                None
            } else {
                run.exit_code
            };
            let _ = events.send(AgentEvent::Exited { code }).await;
        });

        Ok(handle)
    }

    async fn probe(&self) -> Result<String, AgentError> {
        let result = {
            let mut inner = self.inner.lock();
            inner.probe_calls += 1;
            inner.probe_results.pop_front()
        };
        match result {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(AgentError::ProbeFailed(message)),
            None => Ok("ok".to_string()),
        }
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
