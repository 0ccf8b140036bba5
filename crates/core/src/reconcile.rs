// crates/core/src/reconcile.rs
//! Merging server responses into locally held job records.
//!
//! Rules applied to every response:
//! - Generation: a response stamped older than the record's `poll_generation`
//!   is dropped. Arrival order is never trusted.
//! - Terminal records are immutable; only deletion touches them.
//! - Status changes must follow the state machine. Polls may observe several
//!   edges at once, so intermediate non-terminal states are walked through.
//! - Progress only moves forward, sits at 100 only when completed, and is
//!   reset solely by an accepted retry.
//! - A failed job always carries an error message.

use chrono::{DateTime, Utc};
use console_jobs_types::{JobRecord, JobSnapshot, JobStatus};

/// Error recorded for a failed job whose server response had no message.
pub const UNKNOWN_FAILURE: &str = "unknown failure";

/// Prefix of the error recorded when transport failures exceed the limit.
pub const TRACKING_LOST: &str = "tracking lost";

/// What happened to a record when a response was merged into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// At least one visible field changed.
    Applied { from: JobStatus, to: JobStatus },
    /// Accepted, but nothing a renderer would see changed.
    Unchanged,
    /// Stamped with an older generation than the one already applied.
    Stale { generation: u64, current: u64 },
    /// The record is terminal and ignores further responses.
    TerminalIgnored,
    /// The reported status cannot be reached from the local one.
    InvalidTransition { from: JobStatus, to: JobStatus },
}

impl Reconciliation {
    pub fn is_applied(&self) -> bool {
        matches!(self, Reconciliation::Applied { .. })
    }

    /// Whether the response was dropped without touching the record.
    pub fn is_discarded(&self) -> bool {
        matches!(
            self,
            Reconciliation::Stale { .. }
                | Reconciliation::TerminalIgnored
                | Reconciliation::InvalidTransition { .. }
        )
    }
}

/// Merge a poll (or command) response stamped with `generation`.
pub fn reconcile(
    record: &mut JobRecord,
    snapshot: &JobSnapshot,
    generation: u64,
    now: DateTime<Utc>,
) -> Reconciliation {
    if generation < record.poll_generation {
        return Reconciliation::Stale {
            generation,
            current: record.poll_generation,
        };
    }
    if record.is_terminal() {
        return Reconciliation::TerminalIgnored;
    }

    let from = record.status;
    let Some(path) = from.observed_path(snapshot.status) else {
        return Reconciliation::InvalidTransition {
            from,
            to: snapshot.status,
        };
    };

    let before = record.clone();
    record.poll_generation = generation;
    for step in path {
        enter(record, step, snapshot, now);
    }
    record.unconfirmed = false;
    merge_fields(record, snapshot);

    outcome(&before, record)
}

/// Local half of an accepted retry: `failed -> queued`, a new attempt.
pub fn apply_retry(record: &mut JobRecord, generation: u64) -> Reconciliation {
    if generation < record.poll_generation {
        return Reconciliation::Stale {
            generation,
            current: record.poll_generation,
        };
    }
    if record.status != JobStatus::Failed {
        return Reconciliation::InvalidTransition {
            from: record.status,
            to: JobStatus::Queued,
        };
    }

    record.status = JobStatus::Queued;
    record.retry_count = record.retry_count.saturating_add(1);
    record.error = None;
    record.progress = 0;
    record.items_processed = record.items_processed.map(|_| 0);
    record.started_at = None;
    record.completed_at = None;
    record.unconfirmed = false;
    record.poll_generation = generation;

    Reconciliation::Applied {
        from: JobStatus::Failed,
        to: JobStatus::Queued,
    }
}

/// State needed to undo an optimistic transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Optimistic {
    pub previous: JobStatus,
    pub target: JobStatus,
    previous_unconfirmed: bool,
    previous_started_at: Option<DateTime<Utc>>,
    previous_completed_at: Option<DateTime<Utc>>,
}

/// Move the record to `target` ahead of server confirmation.
///
/// Raises `poll_generation` to `generation` so any poll issued before the
/// command is discarded when it lands.
pub fn apply_optimistic(
    record: &mut JobRecord,
    target: JobStatus,
    generation: u64,
    now: DateTime<Utc>,
) -> Optimistic {
    let undo = Optimistic {
        previous: record.status,
        target,
        previous_unconfirmed: record.unconfirmed,
        previous_started_at: record.started_at,
        previous_completed_at: record.completed_at,
    };

    record.status = target;
    record.unconfirmed = true;
    record.poll_generation = record.poll_generation.max(generation);
    if target == JobStatus::Running {
        stamp_started(record, None, now);
    }
    if target.is_terminal() {
        stamp_completed(record, None, now);
    }
    undo
}

/// Revert an optimistic transition the server declined. No-op if something
/// else already replaced the optimistic status.
pub fn rollback(record: &mut JobRecord, undo: &Optimistic) -> bool {
    if record.status != undo.target || !record.unconfirmed {
        return false;
    }
    record.status = undo.previous;
    record.unconfirmed = undo.previous_unconfirmed;
    record.started_at = undo.previous_started_at;
    record.completed_at = undo.previous_completed_at;
    true
}

/// Replace an unconfirmed optimistic status with the server's answer.
///
/// This is how a cancel that lost the race against completion gets
/// corrected: the server's status is authoritative, even if terminal,
/// even if it reopens the job. Confirmed records go through [`reconcile`].
pub fn apply_confirmation(
    record: &mut JobRecord,
    snapshot: &JobSnapshot,
    generation: u64,
    now: DateTime<Utc>,
) -> Reconciliation {
    if !record.unconfirmed {
        return reconcile(record, snapshot, generation, now);
    }
    if generation < record.poll_generation {
        return Reconciliation::Stale {
            generation,
            current: record.poll_generation,
        };
    }

    let before = record.clone();
    let to = snapshot.status;
    record.poll_generation = generation;
    record.unconfirmed = false;
    record.status = to;

    if to.is_terminal() {
        if let Some(at) = snapshot.completed_at {
            record.completed_at = None;
            stamp_completed(record, Some(at), now);
        } else {
            stamp_completed(record, None, now);
        }
    } else {
        record.completed_at = None;
    }
    if matches!(to, JobStatus::Running | JobStatus::Paused | JobStatus::Completed) {
        stamp_started(record, snapshot.started_at, now);
    }
    merge_fields(record, snapshot);

    outcome(&before, record)
}

/// Give up on a job whose status can no longer be fetched.
pub fn mark_tracking_lost(record: &mut JobRecord, failures: u32, now: DateTime<Utc>) -> Reconciliation {
    if record.is_terminal() {
        return Reconciliation::TerminalIgnored;
    }
    let from = record.status;
    record.status = JobStatus::Failed;
    record.error = Some(format!(
        "{TRACKING_LOST}: no status after {failures} consecutive attempts"
    ));
    record.unconfirmed = false;
    stamp_completed(record, None, now);
    Reconciliation::Applied {
        from,
        to: JobStatus::Failed,
    }
}

/// Build a record for a job discovered by a bulk load, normalised so the
/// record invariants hold even if the server's view does not.
pub fn record_from_snapshot(snapshot: &JobSnapshot, now: DateTime<Utc>) -> JobRecord {
    let mut record = JobRecord::new(
        snapshot.id.clone(),
        snapshot.kind.clone().unwrap_or_default(),
        serde_json::Value::Null,
        snapshot.created_at.unwrap_or(now),
    );
    record.status = snapshot.status;
    if let Some(at) = snapshot.started_at {
        stamp_started(&mut record, Some(at), now);
    }
    if snapshot.status.is_terminal() {
        if let Some(at) = snapshot.completed_at {
            stamp_completed(&mut record, Some(at), now);
        }
    }
    merge_fields(&mut record, snapshot);
    record
}

/// Side effects of entering `step` while walking an observed path.
fn enter(record: &mut JobRecord, step: JobStatus, snapshot: &JobSnapshot, now: DateTime<Utc>) {
    if step == JobStatus::Running {
        stamp_started(record, snapshot.started_at, now);
    }
    if step.is_terminal() {
        stamp_completed(record, snapshot.completed_at, now);
    }
    record.status = step;
}

/// Counters, progress, error and retry count from a response whose status
/// has already been applied.
fn merge_fields(record: &mut JobRecord, snapshot: &JobSnapshot) {
    if snapshot.items_total.is_some() {
        record.items_total = snapshot.items_total;
    }
    if snapshot.items_processed.is_some() {
        record.items_processed = snapshot.items_processed;
    }

    record.progress = match record.status {
        JobStatus::Completed => 100,
        _ => record
            .progress
            .max(snapshot.effective_progress().unwrap_or(0))
            .min(99),
    };

    record.error = match record.status {
        JobStatus::Failed => Some(
            snapshot
                .error
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .unwrap_or(UNKNOWN_FAILURE)
                .to_string(),
        ),
        _ => None,
    };

    if let Some(count) = snapshot.retry_count {
        record.retry_count = record.retry_count.max(count);
    }
}

fn stamp_started(record: &mut JobRecord, at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    if record.started_at.is_none() {
        record.started_at = Some(at.unwrap_or(now).max(record.created_at));
    }
}

fn stamp_completed(record: &mut JobRecord, at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    if record.completed_at.is_none() {
        let floor = record.started_at.unwrap_or(record.created_at);
        record.completed_at = Some(at.unwrap_or(now).max(floor));
    }
}

fn outcome(before: &JobRecord, after: &JobRecord) -> Reconciliation {
    let mut probe = after.clone();
    probe.poll_generation = before.poll_generation;
    probe.last_polled_at = before.last_polled_at;
    if probe == *before {
        Reconciliation::Unchanged
    } else {
        Reconciliation::Applied {
            from: before.status,
            to: after.status,
        }
    }
}
