// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution helpers

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Default timeout for crontab commands.
pub const CRONTAB_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the rate-limit probe invocation.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Run a subprocess command with a timeout.
///
/// Wraps `Command::output()` with `tokio::time::timeout`, converting
/// timeout expiration into a descriptive error message. The child process
/// is killed automatically if the timeout elapses (via the tokio `Child`
/// drop implementation).
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    description: &str,
) -> Result<Output, String> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(io_err)) => Err(format!("{} failed: {}", description, io_err)),
        Err(_elapsed) => Err(format!(
            "{} timed out after {}s",
            description,
            timeout.as_secs()
        )),
    }
}

/// Deliver a signal to a pid via kill(1).
pub async fn send_signal(pid: u32, signal: &str) -> Result<(), String> {
    let mut cmd = Command::new("kill");
    cmd.arg(format!("-{signal}")).arg(pid.to_string());
    let output = run_with_timeout(cmd, Duration::from_secs(5), "kill").await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "kill -{signal} {pid}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Whether a pid is alive (signal 0 delivery).
pub async fn pid_alive(pid: u32) -> bool {
    send_signal(pid, "0").await.is_ok()
}

/// SIGTERM, wait out the grace period, then SIGKILL if still alive.
pub async fn terminate_with_grace(pid: u32, grace: Duration) {
    if send_signal(pid, "TERM").await.is_err() {
        return; // already gone
    }

    let deadline = tokio::time::Instant::now() + grace;
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        if !pid_alive(pid).await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }

    let _ = send_signal(pid, "KILL").await;
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
