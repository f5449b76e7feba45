// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! taskctl: thin client over the taskd socket.
//!
//! Exit codes: 0 accepted, 2 validation error, 3 daemon unreachable.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskd_core::{Priority, TaskClass, TaskSpec, TaskState};
use taskd_daemon::{ErrorCode, Request, Response};

pub const EXIT_VALIDATION: i32 = 2;
pub const EXIT_UNAVAILABLE: i32 = 3;

#[derive(Parser)]
#[command(name = "taskctl", version, about = "Submit and inspect taskd work items")]
struct Cli {
    /// State directory override (default: TASKD_STATE_DIR or ~/.local/state/taskd)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a new task
    Submit {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        /// lightweight | medium_context | heavy_context
        #[arg(long, default_value = "lightweight")]
        class: String,
        /// low | normal | high | urgent
        #[arg(long, default_value = "normal")]
        priority: String,
        #[arg(long)]
        working_dir: Option<PathBuf>,
        /// Idempotency key: resubmitting returns the original task id
        #[arg(long)]
        dedup_key: Option<String>,
    },
    /// List tasks, optionally filtered by state
    List {
        #[arg(long)]
        state: Option<String>,
    },
    /// Show one task with its security findings
    Show { id: String },
    /// Cancel a non-terminal task
    Cancel { id: String },
    /// Release a task held for human review back into the queue
    Release { id: String },
    /// Pause a processing task
    Pause { id: String },
    /// Resume a paused task
    Resume { id: String },
    /// Manage periodic submission schedules
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// Daemon status summary
    Status,
    /// Ask the daemon to shut down
    Stop,
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Add a schedule (five-field cron expression)
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        cron: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "lightweight")]
        class: String,
        #[arg(long, default_value = "normal")]
        priority: String,
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
    /// List schedules
    List,
    /// Remove a schedule
    Remove { id: String },
    /// Enable a schedule
    Enable { id: String },
    /// Disable a schedule
    Disable { id: String },
    /// Fire a schedule immediately
    Run { id: String },
}

fn parse_class(value: &str) -> TaskClass {
    match value.parse() {
        Ok(class) => class,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_VALIDATION);
        }
    }
}

fn parse_priority(value: &str) -> Priority {
    match value.parse() {
        Ok(priority) => priority,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_VALIDATION);
        }
    }
}

fn parse_state(value: &str) -> TaskState {
    let parsed = serde_json::from_value(serde_json::Value::String(value.to_string()));
    match parsed {
        Ok(state) => state,
        Err(_) => {
            eprintln!("error: unknown state: {value}");
            std::process::exit(EXIT_VALIDATION);
        }
    }
}

fn build_request(command: Command) -> Request {
    match command {
        Command::Submit {
            name,
            description,
            class,
            priority,
            working_dir,
            dedup_key,
        } => Request::Submit {
            spec: TaskSpec {
                name,
                description,
                class: parse_class(&class),
                priority: parse_priority(&priority),
                working_dir,
                dedup_key,
                max_attempts: None,
            },
        },
        Command::List { state } => Request::List {
            state: state.as_deref().map(parse_state),
        },
        Command::Show { id } => Request::Get { id },
        Command::Cancel { id } => Request::Cancel { id },
        Command::Release { id } => Request::Release { id },
        Command::Pause { id } => Request::Pause { id },
        Command::Resume { id } => Request::Resume { id },
        Command::Schedule(schedule) => match schedule {
            ScheduleCommand::Add {
                name,
                cron,
                description,
                class,
                priority,
                working_dir,
            } => Request::ScheduleAdd {
                name,
                cron_expr: cron,
                description,
                class: parse_class(&class),
                priority: parse_priority(&priority),
                working_dir,
            },
            ScheduleCommand::List => Request::ScheduleList,
            ScheduleCommand::Remove { id } => Request::ScheduleRemove { id },
            ScheduleCommand::Enable { id } => Request::ScheduleSetEnabled { id, enabled: true },
            ScheduleCommand::Disable { id } => Request::ScheduleSetEnabled { id, enabled: false },
            ScheduleCommand::Run { id } => Request::ScheduleRun { id },
        },
        Command::Status => Request::Status,
        Command::Stop => Request::Shutdown,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let socket = match client::socket_path(cli.state_dir) {
        Ok(socket) => socket,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_UNAVAILABLE);
        }
    };

    let request = build_request(cli.command);
    let response = match client::roundtrip(&socket, &request).await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("error: cannot reach taskd at {}: {e}", socket.display());
            std::process::exit(EXIT_UNAVAILABLE);
        }
    };

    match response {
        Response::Error { code, message } => {
            eprintln!("error: {message}");
            let exit = match code {
                ErrorCode::Validation => EXIT_VALIDATION,
                ErrorCode::NotFound | ErrorCode::Conflict => 1,
                ErrorCode::Internal => 1,
            };
            std::process::exit(exit);
        }
        response => {
            output::render(&response);
        }
    }
}
