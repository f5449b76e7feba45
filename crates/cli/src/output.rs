// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain-text rendering of daemon responses.

use taskd_core::{Task, TaskState};
use taskd_daemon::Response;

pub fn render(response: &Response) {
    match response {
        Response::Ok => println!("ok"),

        Response::Submitted { id, verdict } => {
            if verdict.is_allowed() {
                println!("{id}");
            } else {
                println!("{id}");
                eprintln!("note: command held for review ({verdict:?})");
            }
        }

        Response::Tasks { tasks } => {
            if tasks.is_empty() {
                println!("no tasks");
                return;
            }
            println!(
                "{:<10} {:<20} {:<16} {:<8} {:<18} {:>3}",
                "ID", "NAME", "CLASS", "PRIO", "STATE", "ATT"
            );
            for task in tasks {
                println!(
                    "{:<10} {:<20} {:<16} {:<8} {:<18} {:>3}",
                    task.id.short(8),
                    truncate(&task.name, 20),
                    task.class,
                    task.priority,
                    task.state,
                    task.attempt_count,
                );
            }
        }

        Response::Task { task, findings } => {
            render_task(task);
            if !findings.is_empty() {
                println!("findings:");
                for finding in findings {
                    println!(
                        "  {} [{}..{}] {:?}",
                        finding.kind, finding.span.0, finding.span.1, finding.masked_value
                    );
                }
            }
        }

        Response::Schedule { schedule } => {
            println!("{} {} ({})", schedule.id.short(8), schedule.name, schedule.cron_expr);
        }

        Response::Schedules { schedules } => {
            if schedules.is_empty() {
                println!("no schedules");
                return;
            }
            println!(
                "{:<10} {:<20} {:<16} {:<8} {}",
                "ID", "NAME", "CRON", "STATE", "LAST FIRED"
            );
            for schedule in schedules {
                println!(
                    "{:<10} {:<20} {:<16} {:<8} {}",
                    schedule.id.short(8),
                    truncate(&schedule.name, 20),
                    schedule.cron_expr,
                    if schedule.enabled { "on" } else { "off" },
                    schedule
                        .last_fired_at_ms
                        .map(|ms| ms.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }

        Response::Status { report } => {
            println!("taskd {}", report.version);
            println!(
                "agent: {}",
                if report.rate_limit.available {
                    "available".to_string()
                } else {
                    format!(
                        "rate limited (hits: {}, resume at: {})",
                        report.rate_limit.consecutive_hits,
                        report
                            .rate_limit
                            .resume_at_ms
                            .map(|ms| ms.to_string())
                            .unwrap_or_else(|| "unknown".to_string())
                    )
                }
            );
            println!("schedules: {}", report.schedules);
            println!("tasks:");
            for state in TaskState::all() {
                if let Some(count) = report.counts.get(&state) {
                    if *count > 0 {
                        println!("  {state}: {count}");
                    }
                }
            }
            println!("workers:");
            for worker in &report.workers {
                if worker.stopped {
                    continue;
                }
                println!(
                    "  {} pid={} task={}",
                    worker.id,
                    worker.pid,
                    worker
                        .current_task_id
                        .as_ref()
                        .map(|t| t.short(8).to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }

        Response::Error { message, .. } => eprintln!("error: {message}"),
    }
}

fn render_task(task: &Task) {
    println!("id:       {}", task.id);
    println!("name:     {}", task.name);
    println!("class:    {}", task.class);
    println!("priority: {}", task.priority);
    println!("state:    {}", task.state);
    println!("attempts: {}/{}", task.attempt_count, task.max_attempts);
    println!("verdict:  {}", task.security_verdict);
    if let Some(kind) = task.failure_kind {
        println!("failure:  {kind}");
    }
    if let Some(error) = &task.last_error {
        println!("error:    {}", truncate(error, 200));
    }
    if let Some(worker) = &task.worker_id {
        println!("worker:   {worker}");
    }
    if !task.output_tail.is_empty() {
        println!("output tail:");
        for line in task.output_tail.tail_lines(20) {
            println!("  {line}");
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
