// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! taskd: unattended supervisor for an agent CLI.
//!
//! Owns the durable queue, the worker pool, rate-limit backoff, the
//! recovery loop, and the security gate. `taskctl` talks to it over a
//! unix socket; Prometheus scrapes `/metrics`.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;
use taskd_daemon::lifecycle::{self, LifecycleError};
use taskd_daemon::{env, listener, metrics_http};
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("taskd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("taskd {}", env!("CARGO_PKG_VERSION"));
                println!("Unattended supervisor that drives an agent CLI through a task queue.");
                println!();
                println!("USAGE:");
                println!("    taskd");
                println!();
                println!("State lives under TASKD_STATE_DIR (default ~/.local/state/taskd).");
                println!("Submit and inspect tasks with `taskctl`.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: taskd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let state_root = env::state_dir()?;
    let paths = taskd_engine::StatePaths::new(&state_root);
    rotate_log_if_needed(&paths.main_log());
    let log_guard = setup_logging(&paths)?;

    info!(state_dir = %state_root.display(), "starting taskd");

    let daemon = match lifecycle::startup(state_root) {
        Ok(daemon) => Arc::new(daemon),
        Err(LifecycleError::LockFailed(_)) => {
            eprintln!("taskd is already running (lock held)");
            std::process::exit(1);
        }
        Err(e) => {
            error!("failed to start: {e}");
            drop(log_guard);
            return Err(e.into());
        }
    };

    // Unix socket listener for taskctl.
    let socket_path = daemon.paths.socket();
    let _ = std::fs::remove_file(&socket_path); // stale socket from a crash
    let unix_listener = UnixListener::bind(&socket_path)?;
    tokio::spawn(listener::run(unix_listener, Arc::clone(&daemon)));

    // Prometheus exposition.
    tokio::spawn(metrics_http::serve(Arc::clone(&daemon)));

    info!(socket = %socket_path.display(), "taskd ready");
    println!("READY");

    // Wait for a shutdown signal.
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut shutdown = daemon.shutdown_signal();
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = shutdown.changed() => info!("shutdown requested via command"),
    }

    daemon.shutdown().await;
    info!("taskd stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (main.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `main.log` → `main.log.1` → `main.log.2` → `main.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently
/// ignored so the daemon still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    // Shift older rotations: .3 is deleted, .2→.3, .1→.2
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    // Rotate current log → .1
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    paths: &taskd_engine::StatePaths,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_path = paths.main_log();
    let log_dir = log_path
        .parent()
        .ok_or("log path has no parent directory")?;
    std::fs::create_dir_all(log_dir)?;

    let file_name = log_path.file_name().ok_or("log path has no file name")?;
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
