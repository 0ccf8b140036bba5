// crates/core/src/registry.rs
//! In-memory table of tracked jobs, keyed by id and kept in creation order.
//!
//! Every method is synchronous. The tracker keeps the registry behind one
//! mutex that is never held across an `.await`, so each call is atomic with
//! respect to polls and commands.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use console_jobs_types::{CreatedJob, JobCommand, JobId, JobKind, JobRecord, JobSnapshot};

use crate::error::TrackerError;
use crate::reconcile;

/// Per-job bookkeeping that renderers never see.
#[derive(Debug)]
struct Entry {
    record: JobRecord,
    /// Last generation handed out to a poll or command.
    issued_generation: u64,
    /// Command currently awaiting the server, if any.
    in_flight: Option<JobCommand>,
    consecutive_failures: u32,
}

impl Entry {
    fn new(record: JobRecord) -> Self {
        Self {
            issued_generation: record.poll_generation,
            record,
            in_flight: None,
            consecutive_failures: 0,
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.issued_generation = self.issued_generation.max(self.record.poll_generation) + 1;
        self.issued_generation
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<JobId, Entry>,
    order: Vec<JobId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Add a queued job under a local placeholder id.
    pub fn create(
        &mut self,
        kind: JobKind,
        params: serde_json::Value,
        now: DateTime<Utc>,
    ) -> JobRecord {
        let record = JobRecord::new(JobId::placeholder(), kind, params, now);
        self.push(record.clone());
        record
    }

    /// Swap a placeholder id for the id the server assigned, keeping the
    /// job's position. If the server id is already tracked (a bulk load got
    /// there first) the placeholder is dropped and the existing record wins.
    pub fn confirm_id(&mut self, placeholder: &JobId, created: &CreatedJob) -> Option<JobRecord> {
        if self.entries.contains_key(&created.id) {
            self.remove(placeholder);
            return self.get(&created.id).cloned();
        }

        let mut entry = self.entries.remove(placeholder)?;
        entry.record.id = created.id.clone();
        if let Some(created_at) = created.created_at {
            entry.record.created_at = created_at;
        }
        if let Some(slot) = self.order.iter_mut().find(|id| **id == *placeholder) {
            *slot = created.id.clone();
        }
        let record = entry.record.clone();
        self.entries.insert(created.id.clone(), entry);
        Some(record)
    }

    /// Add a job discovered by a bulk load. Returns `None` when the id is
    /// already tracked.
    pub fn insert_snapshot(&mut self, snapshot: &JobSnapshot, now: DateTime<Utc>) -> Option<JobRecord> {
        if self.entries.contains_key(&snapshot.id) {
            return None;
        }
        let record = reconcile::record_from_snapshot(snapshot, now);
        self.push(record.clone());
        Some(record)
    }

    pub fn get(&self, id: &JobId) -> Option<&JobRecord> {
        self.entries.get(id).map(|e| &e.record)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.entries.contains_key(id)
    }

    /// All records in creation order.
    pub fn list(&self) -> Vec<JobRecord> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.order.clone()
    }

    pub fn remove(&mut self, id: &JobId) -> Option<JobRecord> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|other| other != id);
        Some(entry.record)
    }

    /// Drop every record. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let n = self.order.len();
        self.entries.clear();
        self.order.clear();
        n
    }

    /// Command awaiting the server for `id`, if any.
    pub fn in_flight(&self, id: &JobId) -> Option<JobCommand> {
        self.entries.get(id).and_then(|e| e.in_flight)
    }

    pub(crate) fn record_mut(&mut self, id: &JobId) -> Option<&mut JobRecord> {
        self.entries.get_mut(id).map(|e| &mut e.record)
    }

    /// Hand out a fresh generation for a request about `id`.
    pub(crate) fn next_generation(&mut self, id: &JobId) -> Option<u64> {
        self.entries.get_mut(id).map(Entry::next_generation)
    }

    /// Stamp a status poll. `None` when the job should not be polled right
    /// now: unknown, placeholder, terminal, or a command is in flight.
    pub(crate) fn stamp_poll(&mut self, id: &JobId, now: DateTime<Utc>) -> Option<u64> {
        if id.is_placeholder() {
            return None;
        }
        let entry = self.entries.get_mut(id)?;
        if entry.in_flight.is_some() || entry.record.is_terminal() {
            return None;
        }
        entry.record.last_polled_at = Some(now);
        Some(entry.next_generation())
    }

    /// Validate `command` against the job's current state and mark it in
    /// flight. Returns the generation the command's response is stamped with.
    pub(crate) fn begin_command(
        &mut self,
        id: &JobId,
        command: JobCommand,
    ) -> Result<u64, TrackerError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.clone()))?;
        if id.is_placeholder() {
            return Err(TrackerError::PendingCreation(id.clone()));
        }
        if let Some(pending) = entry.in_flight {
            return Err(TrackerError::CommandInFlight {
                id: id.clone(),
                command,
                pending,
            });
        }
        if !command.allowed_from(entry.record.status) {
            return Err(TrackerError::InvalidCommand {
                id: id.clone(),
                command,
                status: entry.record.status,
            });
        }
        entry.in_flight = Some(command);
        Ok(entry.next_generation())
    }

    pub(crate) fn end_command(&mut self, id: &JobId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.in_flight = None;
        }
    }

    /// Count one more transport failure for `id`; returns the running streak.
    pub(crate) fn record_failure(&mut self, id: &JobId) -> u32 {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.consecutive_failures += 1;
                entry.consecutive_failures
            }
            None => 0,
        }
    }

    pub(crate) fn reset_failures(&mut self, id: &JobId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.consecutive_failures = 0;
        }
    }

    fn push(&mut self, record: JobRecord) {
        self.order.push(record.id.clone());
        self.entries.insert(record.id.clone(), Entry::new(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use console_jobs_types::JobStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn created(id: &str) -> CreatedJob {
        CreatedJob {
            id: JobId::new(id),
            status: JobStatus::Queued,
            created_at: None,
        }
    }

    #[test]
    fn test_create_uses_placeholder_and_keeps_order() {
        let mut registry = Registry::new();
        let a = registry.create(JobKind::new("backup"), json!({}), Utc::now());
        let b = registry.create(JobKind::new("import"), json!({"file": "x.csv"}), Utc::now());

        assert!(a.id.is_placeholder());
        assert_eq!(a.status, JobStatus::Queued);
        let ids: Vec<_> = registry.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_confirm_id_rekeys_in_place() {
        let mut registry = Registry::new();
        let a = registry.create(JobKind::new("backup"), json!({}), Utc::now());
        let b = registry.create(JobKind::new("import"), json!({}), Utc::now());

        let confirmed = registry.confirm_id(&a.id, &created("srv-1")).unwrap();
        assert_eq!(confirmed.id, JobId::new("srv-1"));
        assert!(registry.get(&a.id).is_none());

        let ids: Vec<_> = registry.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![JobId::new("srv-1"), b.id]);
    }

    #[test]
    fn test_confirm_id_defers_to_already_loaded_job() {
        let mut registry = Registry::new();
        let placeholder = registry.create(JobKind::new("backup"), json!({}), Utc::now());
        let loaded = JobSnapshot::new("srv-1", JobStatus::Running).with_progress(10.0);
        registry.insert_snapshot(&loaded, Utc::now()).unwrap();

        let record = registry.confirm_id(&placeholder.id, &created("srv-1")).unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_snapshot_skips_known_ids() {
        let mut registry = Registry::new();
        let snap = JobSnapshot::new("srv-9", JobStatus::Queued);
        assert!(registry.insert_snapshot(&snap, Utc::now()).is_some());
        assert!(registry.insert_snapshot(&snap, Utc::now()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut registry = Registry::new();
        let a = registry.create(JobKind::new("backup"), json!({}), Utc::now());
        registry.create(JobKind::new("backup"), json!({}), Utc::now());

        assert!(registry.remove(&a.id).is_some());
        assert!(registry.remove(&a.id).is_none());
        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_generations_increase_across_polls_and_commands() {
        let mut registry = Registry::new();
        registry
            .insert_snapshot(&JobSnapshot::new("j", JobStatus::Running), Utc::now())
            .unwrap();
        let id = JobId::new("j");

        let g1 = registry.stamp_poll(&id, Utc::now()).unwrap();
        let g2 = registry.stamp_poll(&id, Utc::now()).unwrap();
        let g3 = registry.begin_command(&id, JobCommand::Pause).unwrap();
        assert!(g1 < g2 && g2 < g3);
        assert!(registry.get(&id).unwrap().last_polled_at.is_some());
    }

    #[test]
    fn test_in_flight_command_blocks_polls_and_other_commands() {
        let mut registry = Registry::new();
        registry
            .insert_snapshot(&JobSnapshot::new("j", JobStatus::Failed), Utc::now())
            .unwrap();
        let id = JobId::new("j");

        registry.begin_command(&id, JobCommand::Retry).unwrap();
        assert_eq!(registry.in_flight(&id), Some(JobCommand::Retry));
        assert!(matches!(
            registry.begin_command(&id, JobCommand::Retry),
            Err(TrackerError::CommandInFlight { pending: JobCommand::Retry, .. })
        ));
        assert!(registry.stamp_poll(&id, Utc::now()).is_none());

        registry.end_command(&id);
        assert_eq!(registry.in_flight(&id), None);
    }

    #[test]
    fn test_begin_command_validates_status_and_placeholders() {
        let mut registry = Registry::new();
        registry
            .insert_snapshot(&JobSnapshot::new("j", JobStatus::Running), Utc::now())
            .unwrap();
        let err = registry
            .begin_command(&JobId::new("j"), JobCommand::Retry)
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidCommand { status: JobStatus::Running, .. }));
        assert_eq!(registry.in_flight(&JobId::new("j")), None);

        let placeholder = registry.create(JobKind::new("backup"), json!({}), Utc::now());
        assert!(matches!(
            registry.begin_command(&placeholder.id, JobCommand::Cancel),
            Err(TrackerError::PendingCreation(_))
        ));
        assert!(matches!(
            registry.begin_command(&JobId::new("nope"), JobCommand::Cancel),
            Err(TrackerError::NotFound(_))
        ));
    }

    #[test]
    fn test_terminal_and_placeholder_jobs_are_not_polled() {
        let mut registry = Registry::new();
        registry
            .insert_snapshot(&JobSnapshot::new("done", JobStatus::Completed), Utc::now())
            .unwrap();
        let placeholder = registry.create(JobKind::new("backup"), json!({}), Utc::now());

        assert!(registry.stamp_poll(&JobId::new("done"), Utc::now()).is_none());
        assert!(registry.stamp_poll(&placeholder.id, Utc::now()).is_none());
    }

    #[test]
    fn test_failure_streak_counts_and_resets() {
        let mut registry = Registry::new();
        registry
            .insert_snapshot(&JobSnapshot::new("j", JobStatus::Running), Utc::now())
            .unwrap();
        let id = JobId::new("j");
        assert_eq!(registry.record_failure(&id), 1);
        assert_eq!(registry.record_failure(&id), 2);
        registry.reset_failures(&id);
        assert_eq!(registry.record_failure(&id), 1);
        assert_eq!(registry.record_failure(&JobId::new("missing")), 0);
    }
}
