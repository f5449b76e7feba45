// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Real agent subprocess driver.

use super::{AgentCli, AgentError, AgentEvent, AgentHandle, AgentInvocation};
use crate::subprocess::{run_with_timeout, terminate_with_grace, PROBE_TIMEOUT};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Spawns the agent CLI as a child process and streams its output.
#[derive(Clone)]
pub struct ProcessAgentCli {
    program: String,
    kill_grace: Duration,
}

impl ProcessAgentCli {
    pub fn new(program: impl Into<String>, kill_grace: Duration) -> Self {
        Self {
            program: program.into(),
            kill_grace,
        }
    }

    fn build_command(&self, invocation: &AgentInvocation) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.arg("-p")
            .arg(&invocation.prompt)
            .arg("--output-format")
            .arg("text");
        if !invocation.tool_allowlist.is_empty() {
            cmd.arg("--allowedTools")
                .arg(invocation.tool_allowlist.join(","));
        }
        cmd.current_dir(&invocation.working_dir);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentCli for ProcessAgentCli {
    async fn spawn(
        &self,
        invocation: AgentInvocation,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<AgentHandle, AgentError> {
        let mut cmd = self.build_command(&invocation);
        let mut child = cmd.spawn().map_err(|e| AgentError::SpawnFailed(e.to_string()))?;

        let pid = child.id();
        let handle = AgentHandle::new(pid);
        debug!(pid, program = %invocation.program, "agent spawned");

        // Stream stdout and stderr line-by-line on their own tasks.
        if let Some(stdout) = child.stdout.take() {
            let tx = events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(AgentEvent::Stdout(line)).await.is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(AgentEvent::Stderr(line)).await.is_err() {
                        break;
                    }
                }
            });
        }

        // Driver: wait for exit or a kill request.
        let kill = handle.kill_requested();
        let grace = self.kill_grace;
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!(error = %e, "agent wait failed");
                        None
                    }
                },
                _ = kill.notified() => {
                    if let Some(pid) = pid {
                        terminate_with_grace(pid, grace).await;
                    }
                    match child.wait().await {
                        Ok(status) => status.code(),
                        Err(_) => None,
                    }
                }
            };
            let _ = events.send(AgentEvent::Exited { code }).await;
        });

        Ok(handle)
    }

    async fn probe(&self) -> Result<String, AgentError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg("Reply with the single word: ok")
            .arg("--output-format")
            .arg("text")
            .arg("--max-turns")
            .arg("1")
            .stdin(Stdio::null());

        let output = run_with_timeout(cmd, PROBE_TIMEOUT, "agent probe")
            .await
            .map_err(AgentError::ProbeFailed)?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(AgentError::ProbeFailed(combined))
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
