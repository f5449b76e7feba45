// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scanned submission and operator release.
//!
//! Submissions are scanned before they enter the queue, so a blocked
//! command never reaches `processing` at all. The worker re-scans only
//! tasks that arrive unscanned.

use taskd_core::{
    task::render_command, Clock, IdGen, ScanVerdict, SecurityFinding, SecurityVerdict, Severity,
    TaskId, TaskSpec, TaskState, TransitionPatch,
};
use taskd_gate::{AuditLog, Gate};
use taskd_storage::{Store, StoreError};
use tracing::warn;

/// Scan a submission and insert it.
///
/// Allowed specs queue as `pending`; refused ones are held in
/// `needs_human_review` with their findings recorded. Returns the task
/// id and the verdict that was applied.
pub fn submit_scanned<C: Clock, G: IdGen>(
    store: &Store<C, G>,
    gate: &Gate,
    audit: &AuditLog,
    clock: &C,
    spec: TaskSpec,
) -> Result<(TaskId, ScanVerdict), StoreError> {
    let command = render_command(&spec.description, spec.class);
    let verdict = gate.scan_command(&command);
    let at_ms = clock.epoch_ms();

    let id = match &verdict {
        ScanVerdict::Allowed => {
            let id = store.submit(spec)?;
            // Scanned clean; the worker will not scan again.
            let task = store.get_task(id.as_str());
            if let Some(task) = task {
                // Deduplicated resubmission keeps the original verdict.
                if task.security_verdict == SecurityVerdict::Unscanned {
                    mark_allowed(store, &id);
                }
            }
            id
        }
        ScanVerdict::NeedsReview { kinds } | ScanVerdict::Blocked { kinds } => {
            let severity = match &verdict {
                ScanVerdict::Blocked { .. } => Severity::Critical,
                _ => Severity::High,
            };
            let id = store.submit_held(spec)?;
            for kind in kinds {
                let finding = SecurityFinding {
                    task_id: id.clone(),
                    kind: kind.clone(),
                    span: (0, command.len()),
                    severity,
                    masked_value: None,
                    at_ms,
                };
                if let Err(e) = store.record_finding(finding.clone()) {
                    warn!(task = %id, error = %e, "failed to persist finding");
                }
                audit.record_finding(&finding, at_ms);
            }
            id
        }
    };

    audit.record_verdict(&id, &verdict, at_ms);
    Ok((id, verdict))
}

fn mark_allowed<C: Clock, G: IdGen>(store: &Store<C, G>, id: &TaskId) {
    let task = match store.get_task(id.as_str()) {
        Some(task) => task,
        None => return,
    };
    let result = store.update_by_token(
        id,
        &task.claim_token,
        taskd_core::TaskPatch {
            security_verdict: Some(SecurityVerdict::Allowed),
            ..Default::default()
        },
    );
    if let Err(e) = result {
        warn!(task = %id, error = %e, "failed to mark submission scanned");
    }
}

/// Operator release of a held task back into the queue.
///
/// The verdict flips to an explicit Allowed override so the worker does
/// not immediately re-block the same command.
pub fn release_held<C: Clock, G: IdGen>(
    store: &Store<C, G>,
    id: &TaskId,
) -> Result<(), StoreError> {
    store.transition(
        id,
        &[TaskState::NeedsHumanReview],
        TaskState::Pending,
        TransitionPatch {
            security_verdict: Some(SecurityVerdict::Allowed),
            ..Default::default()
        },
    )?;
    Ok(())
}

#[cfg(test)]
#[path = "submit_tests.rs"]
mod tests;
