// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unix-socket listener: one task per connection, request/response loop.

use crate::lifecycle::Daemon;
use crate::protocol::{
    self, ErrorCode, ProtocolError, Request, Response, StatusReport, DEFAULT_TIMEOUT,
};
use std::sync::Arc;
use taskd_adapters::crontab::validate_expr;
use taskd_adapters::subprocess::terminate_with_grace;
use taskd_core::{
    Clock, IdGen, ScheduleId, ScheduleRecord, TaskId, TaskState, TransitionPatch, UuidIdGen,
};
use taskd_storage::StoreError;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Accept loop. Runs until the daemon shuts down.
pub async fn run(listener: UnixListener, daemon: Arc<Daemon>) {
    let mut shutdown = daemon.shutdown_signal();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let daemon = Arc::clone(&daemon);
                        tokio::spawn(handle_connection(stream, daemon));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, daemon: Arc<Daemon>) {
    loop {
        let request = match protocol::read_request(&mut stream, DEFAULT_TIMEOUT).await {
            Ok(request) => request,
            Err(ProtocolError::ConnectionClosed) | Err(ProtocolError::Timeout) => return,
            Err(e) => {
                debug!(error = %e, "bad request, closing connection");
                return;
            }
        };

        let response = dispatch(&daemon, request).await;
        if protocol::write_response(&mut stream, &response, DEFAULT_TIMEOUT)
            .await
            .is_err()
        {
            return;
        }
    }
}

/// Handle one request.
pub async fn dispatch(daemon: &Daemon, request: Request) -> Response {
    match request {
        Request::Submit { spec } => {
            match taskd_engine::submit_scanned(
                &daemon.store,
                &daemon.gate,
                &daemon.audit,
                &daemon.clock,
                spec,
            ) {
                Ok((id, verdict)) => Response::Submitted { id, verdict },
                Err(StoreError::InvalidSpec(reason)) => {
                    Response::error(ErrorCode::Validation, reason)
                }
                Err(e) => Response::error(ErrorCode::Internal, e.to_string()),
            }
        }

        Request::List { state } => {
            let mut tasks = daemon
                .store
                .sweep(|t| state.map(|s| t.state == s).unwrap_or(true));
            tasks.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then(a.id.cmp(&b.id)));
            Response::Tasks { tasks }
        }

        Request::Get { id } => match daemon.store.get_task(&id) {
            Some(task) => {
                let findings = daemon.store.findings_for(&task.id);
                Response::Task {
                    task: Box::new(task),
                    findings,
                }
            }
            None => Response::error(ErrorCode::NotFound, format!("no task matching {id:?}")),
        },

        Request::Cancel { id } => cancel_task(daemon, &id).await,

        Request::Release { id } => {
            let Some(task) = daemon.store.get_task(&id) else {
                return Response::error(ErrorCode::NotFound, format!("no task matching {id:?}"));
            };
            match taskd_engine::release_held(&daemon.store, &task.id) {
                Ok(()) => {
                    info!(task = %task.id, "operator released held task");
                    Response::Ok
                }
                Err(StoreError::NotInFromSet { state, .. }) => Response::error(
                    ErrorCode::Conflict,
                    format!("task is {state}, not needs_human_review"),
                ),
                Err(e) => Response::error(ErrorCode::Internal, e.to_string()),
            }
        }

        Request::Pause { id } => {
            let Some(task) = daemon.store.get_task(&id) else {
                return Response::error(ErrorCode::NotFound, format!("no task matching {id:?}"));
            };
            match daemon.store.transition(
                &task.id,
                &[TaskState::Processing],
                TaskState::Paused,
                TransitionPatch::default(),
            ) {
                Ok(_) => {
                    daemon.controls.set_paused(&task.id, true);
                    info!(task = %task.id, "paused at operator request");
                    Response::Ok
                }
                Err(StoreError::NotInFromSet { state, .. }) => Response::error(
                    ErrorCode::Conflict,
                    format!("task is {state}, only processing tasks pause"),
                ),
                Err(e) => Response::error(ErrorCode::Internal, e.to_string()),
            }
        }

        Request::Resume { id } => resume_task(daemon, &id),

        Request::ScheduleAdd {
            name,
            cron_expr,
            description,
            class,
            priority,
            working_dir,
        } => {
            if name.trim().is_empty() || description.trim().is_empty() {
                return Response::error(
                    ErrorCode::Validation,
                    "schedule name and description must not be empty",
                );
            }
            if let Err(e) = validate_expr(&cron_expr) {
                return Response::error(ErrorCode::Validation, e.to_string());
            }
            let schedule = ScheduleRecord {
                id: ScheduleId::new(UuidIdGen.next()),
                name,
                cron_expr,
                description,
                class,
                priority,
                working_dir,
                enabled: true,
                created_at_ms: daemon.clock.epoch_ms(),
                last_fired_at_ms: None,
            };
            if let Err(e) = daemon.store.add_schedule(schedule.clone()) {
                return Response::error(ErrorCode::Internal, e.to_string());
            }
            sync_crontab(daemon).await;
            Response::Schedule { schedule }
        }

        Request::ScheduleRemove { id } => {
            match daemon.store.remove_schedule(&ScheduleId::new(id)) {
                Ok(schedule) => {
                    sync_crontab(daemon).await;
                    Response::Schedule { schedule }
                }
                Err(StoreError::ScheduleNotFound(id)) => {
                    Response::error(ErrorCode::NotFound, format!("no schedule {id}"))
                }
                Err(e) => Response::error(ErrorCode::Internal, e.to_string()),
            }
        }

        Request::ScheduleList => Response::Schedules {
            schedules: daemon.store.schedules(),
        },

        Request::ScheduleSetEnabled { id, enabled } => {
            match daemon
                .store
                .set_schedule_enabled(&ScheduleId::new(id), enabled)
            {
                Ok(schedule) => {
                    sync_crontab(daemon).await;
                    Response::Schedule { schedule }
                }
                Err(StoreError::ScheduleNotFound(id)) => {
                    Response::error(ErrorCode::NotFound, format!("no schedule {id}"))
                }
                Err(e) => Response::error(ErrorCode::Internal, e.to_string()),
            }
        }

        Request::ScheduleRun { id } => {
            let schedule_id = ScheduleId::new(id);
            let Some(schedule) = daemon
                .store
                .schedules()
                .into_iter()
                .find(|s| s.id == schedule_id)
            else {
                return Response::error(
                    ErrorCode::NotFound,
                    format!("no schedule {schedule_id}"),
                );
            };

            // Manual fires go through the same gate as CLI submissions.
            let command = taskd_core::task::render_command(&schedule.description, schedule.class);
            let verdict = daemon.gate.scan_command(&command);
            if verdict.is_allowed() {
                match daemon.store.submit_from_schedule(&schedule_id) {
                    Ok(task_id) => Response::Submitted {
                        id: task_id,
                        verdict,
                    },
                    Err(e) => Response::error(ErrorCode::Internal, e.to_string()),
                }
            } else {
                match taskd_engine::submit_scanned(
                    &daemon.store,
                    &daemon.gate,
                    &daemon.audit,
                    &daemon.clock,
                    schedule.to_spec(),
                ) {
                    Ok((task_id, verdict)) => Response::Submitted { id: task_id, verdict },
                    Err(e) => Response::error(ErrorCode::Internal, e.to_string()),
                }
            }
        }

        Request::Status => Response::Status {
            report: Box::new(StatusReport {
                counts: daemon.store.counts_by_state(),
                workers: daemon.store.workers(),
                rate_limit: daemon.store.rate_limit(),
                schedules: daemon.store.schedules().len(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),
        },

        Request::Shutdown => {
            daemon.request_shutdown();
            Response::Ok
        }
    }
}

async fn cancel_task(daemon: &Daemon, id: &str) -> Response {
    let Some(task) = daemon.store.get_task(id) else {
        return Response::error(ErrorCode::NotFound, format!("no task matching {id:?}"));
    };
    match daemon.store.cancel(&task.id) {
        Ok((prior, pid)) => {
            daemon.metrics.incr_task_run("cancelled");
            if matches!(prior, TaskState::Processing | TaskState::Paused) {
                signal_worker(daemon, &task.id, pid).await;
            }
            info!(task = %task.id, prior = %prior, "cancelled");
            Response::Ok
        }
        Err(StoreError::IllegalTransition { from, .. }) => Response::error(
            ErrorCode::Conflict,
            format!("task already terminal ({from})"),
        ),
        Err(e) => Response::error(ErrorCode::Internal, e.to_string()),
    }
}

/// Get the owning worker to tear the subprocess down; fall back to a
/// direct signal when no worker holds the task (e.g. after a restart).
async fn signal_worker(daemon: &Daemon, task_id: &TaskId, pid: Option<u32>) {
    if daemon.controls.cancel(task_id) {
        return;
    }
    if let Some(pid) = pid {
        terminate_with_grace(pid, daemon.config.kill_grace()).await;
    }
}

fn resume_task(daemon: &Daemon, id: &str) -> Response {
    let Some(task) = daemon.store.get_task(id) else {
        return Response::error(ErrorCode::NotFound, format!("no task matching {id:?}"));
    };
    match daemon.store.transition(
        &task.id,
        &[TaskState::Paused],
        TaskState::Processing,
        TransitionPatch::default(),
    ) {
        Ok(_) => {
            if !daemon.controls.set_paused(&task.id, false) {
                // No worker holds the task (daemon restarted while it was
                // paused): requeue instead of leaving it ownerless.
                let result = daemon.store.transition(
                    &task.id,
                    &[TaskState::Processing],
                    TaskState::Pending,
                    TransitionPatch {
                        rotate_claim_token: Some(UuidIdGen.next()),
                        clear_worker: true,
                        ..Default::default()
                    },
                );
                if let Err(e) = result {
                    return Response::error(ErrorCode::Internal, e.to_string());
                }
            }
            info!(task = %task.id, "resumed at operator request");
            Response::Ok
        }
        Err(StoreError::NotInFromSet { state, .. }) => Response::error(
            ErrorCode::Conflict,
            format!("task is {state}, only paused tasks resume"),
        ),
        Err(e) => Response::error(ErrorCode::Internal, e.to_string()),
    }
}

async fn sync_crontab(daemon: &Daemon) {
    let schedules = daemon.store.schedules();
    if let Err(e) = daemon.crontab.sync(&schedules).await {
        warn!(error = %e, "crontab sync failed; schedules remain stored");
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
