// crates/core/src/commands.rs
//! Command dispatcher: retry, cancel, pause, resume and delete.
//!
//! Validity is checked synchronously against the local record before any
//! request goes out. A job accepts one command at a time; the in-flight
//! marker is released by [`InFlight`] on every exit path, including a
//! dropped future.

use std::sync::Arc;

use chrono::Utc;
use console_jobs_types::{JobCommand, JobId, JobRecord, JobSnapshot, JobStatus};

use crate::error::{RemoteError, TrackerError, TrackingNotice};
use crate::metrics;
use crate::reconcile::{self, Reconciliation};
use crate::tracker::{Shared, TrackerState};

#[derive(Clone)]
pub struct CommandDispatcher {
    shared: Arc<Shared>,
}

/// Clears a job's in-flight marker when dropped.
struct InFlight<'a> {
    shared: &'a Shared,
    id: JobId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.lock().registry.end_command(&self.id);
    }
}

impl CommandDispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Re-queue a failed job. Nothing changes locally unless the server
    /// accepts.
    pub async fn retry(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        let command = JobCommand::Retry;
        let (_flight, generation) = self.begin(id, command)?;

        let snapshot = self.send(id, command).await?;

        let record = {
            let mut state = self.shared.lock();
            let TrackerState { registry, .. } = &mut *state;
            let record = registry
                .record_mut(id)
                .ok_or_else(|| TrackerError::NotFound(id.clone()))?;
            reconcile::apply_retry(record, generation);
            reconcile::reconcile(record, &snapshot, generation, Utc::now());
            let record = record.clone();
            self.shared.watch_locked(&mut state, id);
            record
        };

        tracing::info!(job_id = %id, retry_count = record.retry_count, "job retried");
        self.accepted(command);
        self.shared.notify();
        Ok(record)
    }

    /// Cancel a non-terminal job. The record shows `cancelled` immediately
    /// and polling stops; one confirming fetch then replaces the optimistic
    /// state with the server's. A job that finished first ends up
    /// `completed`, one the server kept running is watched again.
    pub async fn cancel(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        let command = JobCommand::Cancel;
        let (_flight, generation) = self.begin(id, command)?;
        let undo = self.optimistic(id, JobStatus::Cancelled, generation)?;

        let sent = self.shared.remote.cancel(id).await;
        if let Err(err) = &sent {
            tracing::warn!(job_id = %id, error = %err, "cancel request failed");
        }

        let confirm_generation = self.shared.lock().registry.next_generation(id);
        let confirmation = self.shared.remote.fetch(id).await;

        let (record, notice) = {
            let mut state = self.shared.lock();
            let TrackerState { registry, watched } = &mut *state;
            let record = registry
                .record_mut(id)
                .ok_or_else(|| TrackerError::NotFound(id.clone()))?;
            let generation = confirm_generation.unwrap_or(generation);
            let now = Utc::now();

            let notice = match (confirmation, &sent) {
                (Ok(server), _) => {
                    reconcile::apply_confirmation(record, &server, generation, now);
                    None
                }
                (Err(error), Ok(server)) => {
                    reconcile::apply_confirmation(record, server, generation, now);
                    Some(TrackingNotice::ConfirmationFailed {
                        id: id.clone(),
                        error,
                    })
                }
                (Err(error), Err(_)) => {
                    reconcile::rollback(record, &undo);
                    Some(TrackingNotice::ConfirmationFailed {
                        id: id.clone(),
                        error,
                    })
                }
            };

            let record = record.clone();
            if record.is_terminal() {
                watched.remove(id);
            } else {
                self.shared.watch_locked(&mut state, id);
            }
            (record, notice)
        };

        if let Some(notice) = notice {
            self.shared.publish(notice);
        }
        self.shared.notify();

        match sent {
            Ok(_) => {
                tracing::info!(job_id = %id, status = %record.status, "cancel confirmed");
                self.accepted(command);
                Ok(record)
            }
            Err(err) => Err(self.failed(id, command, err)),
        }
    }

    pub async fn pause(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        self.toggle(id, JobCommand::Pause, JobStatus::Paused).await
    }

    pub async fn resume(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        self.toggle(id, JobCommand::Resume, JobStatus::Running).await
    }

    /// Remove a terminal job from the server and from the registry. A job
    /// the server has already forgotten is removed locally all the same.
    pub async fn delete(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        let command = JobCommand::Delete;
        let (_flight, _) = self.begin(id, command)?;

        match self.shared.remote.delete(id).await {
            Ok(()) => {}
            Err(RemoteError::NotFound) => {
                tracing::debug!(job_id = %id, "job already gone on server");
            }
            Err(err) => return Err(self.failed(id, command, err)),
        }

        let removed = {
            let mut state = self.shared.lock();
            state.watched.remove(id);
            state.registry.remove(id)
        }
        .ok_or_else(|| TrackerError::NotFound(id.clone()))?;

        tracing::info!(job_id = %id, "job deleted");
        self.accepted(command);
        self.shared.notify();
        Ok(removed)
    }

    /// Optimistic pause or resume, rolled back if the server declines or
    /// cannot be reached.
    async fn toggle(
        &self,
        id: &JobId,
        command: JobCommand,
        target: JobStatus,
    ) -> Result<JobRecord, TrackerError> {
        let (_flight, generation) = self.begin(id, command)?;
        let undo = self.optimistic(id, target, generation)?;

        let result = self.send_raw(id, command).await;

        let record = {
            let mut state = self.shared.lock();
            let TrackerState { registry, watched } = &mut *state;
            let record = registry
                .record_mut(id)
                .ok_or_else(|| TrackerError::NotFound(id.clone()))?;
            match &result {
                Ok(server) => {
                    if let Reconciliation::Applied { from, to } =
                        reconcile::apply_confirmation(record, server, generation, Utc::now())
                    {
                        tracing::debug!(job_id = %id, %from, %to, "command confirmed");
                    }
                }
                Err(_) => {
                    reconcile::rollback(record, &undo);
                }
            }
            let record = record.clone();
            if record.is_terminal() {
                watched.remove(id);
            }
            record
        };
        self.shared.notify();

        match result {
            Ok(_) => {
                tracing::info!(job_id = %id, %command, status = %record.status, "command accepted");
                self.accepted(command);
                Ok(record)
            }
            Err(err) => Err(self.failed(id, command, err)),
        }
    }

    /// Validate and mark `command` in flight.
    fn begin(&self, id: &JobId, command: JobCommand) -> Result<(InFlight<'_>, u64), TrackerError> {
        let generation = self
            .shared
            .lock()
            .registry
            .begin_command(id, command)
            .inspect_err(|err| {
                tracing::debug!(job_id = %id, %command, error = %err, "command refused locally");
                metrics::record_command(command, "invalid");
            })?;
        let flight = InFlight {
            shared: self.shared.as_ref(),
            id: id.clone(),
        };
        Ok((flight, generation))
    }

    fn optimistic(
        &self,
        id: &JobId,
        target: JobStatus,
        generation: u64,
    ) -> Result<reconcile::Optimistic, TrackerError> {
        let undo = {
            let mut state = self.shared.lock();
            let TrackerState { registry, watched } = &mut *state;
            let record = registry
                .record_mut(id)
                .ok_or_else(|| TrackerError::NotFound(id.clone()))?;
            let undo = reconcile::apply_optimistic(record, target, generation, Utc::now());
            if target.is_terminal() {
                watched.remove(id);
            }
            undo
        };
        self.shared.notify();
        Ok(undo)
    }

    async fn send_raw(&self, id: &JobId, command: JobCommand) -> Result<JobSnapshot, RemoteError> {
        let remote = &self.shared.remote;
        match command {
            JobCommand::Retry => remote.retry(id).await,
            JobCommand::Cancel => remote.cancel(id).await,
            JobCommand::Pause => remote.pause(id).await,
            JobCommand::Resume => remote.resume(id).await,
            JobCommand::Delete => Err(RemoteError::Malformed(
                "delete has no snapshot response".into(),
            )),
        }
    }

    async fn send(&self, id: &JobId, command: JobCommand) -> Result<JobSnapshot, TrackerError> {
        self.send_raw(id, command)
            .await
            .map_err(|err| self.failed(id, command, err))
    }

    fn accepted(&self, command: JobCommand) {
        metrics::record_command(command, "accepted");
    }

    fn failed(&self, id: &JobId, command: JobCommand, err: RemoteError) -> TrackerError {
        let outcome = match err {
            RemoteError::Rejected { .. } => "rejected",
            _ => "error",
        };
        metrics::record_command(command, outcome);
        tracing::warn!(job_id = %id, %command, error = %err, "command failed");
        TrackerError::from_remote(id, command, err)
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("service", &self.shared.remote.name())
            .finish()
    }
}
