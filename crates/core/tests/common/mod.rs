//! Scripted in-memory job service shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use console_jobs_core::{JobTracker, RemoteError, RemoteJobService, TrackerConfig};
use console_jobs_types::{CreateJobRequest, CreatedJob, JobCommand, JobId, JobSnapshot, JobStatus};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(String),
    Fetch(JobId),
    List,
    Command(JobCommand, JobId),
}

#[derive(Default)]
struct ServerState {
    jobs: Vec<JobSnapshot>,
    scripted: HashMap<JobId, VecDeque<Result<JobSnapshot, RemoteError>>>,
    fail_all_fetches: bool,
    rejections: HashMap<(JobId, JobCommand), RemoteError>,
    create_error: Option<RemoteError>,
    calls: Vec<Call>,
    next_id: u32,
}

impl ServerState {
    fn job_mut(&mut self, id: &JobId) -> Option<&mut JobSnapshot> {
        self.jobs.iter_mut().find(|j| j.id == *id)
    }
}

/// Fake backend. Holds one snapshot per job as the "server truth"; tests
/// move that truth forward and watch the tracker catch up.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<ServerState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    fetch_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Insert or replace the server's view of a job.
    pub fn set(&self, snapshot: JobSnapshot) {
        let mut state = self.state();
        match state.job_mut(&snapshot.id) {
            Some(existing) => *existing = snapshot,
            None => state.jobs.push(snapshot),
        }
    }

    pub fn server_view(&self, id: &str) -> Option<JobSnapshot> {
        self.state().jobs.iter().find(|j| j.id.as_str() == id).cloned()
    }

    /// Queue one fetch result for `id`, used before falling back to the
    /// stored snapshot.
    pub fn script_fetch(&self, id: &str, result: Result<JobSnapshot, RemoteError>) {
        self.state()
            .scripted
            .entry(JobId::new(id))
            .or_default()
            .push_back(result);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.state().fail_all_fetches = fail;
    }

    pub fn reject(&self, id: &str, command: JobCommand, reason: &str) {
        self.state().rejections.insert(
            (JobId::new(id), command),
            RemoteError::Rejected {
                reason: reason.into(),
            },
        );
    }

    pub fn fail_command(&self, id: &str, command: JobCommand, error: RemoteError) {
        self.state().rejections.insert((JobId::new(id), command), error);
    }

    pub fn fail_create(&self, error: RemoteError) {
        self.state().create_error = Some(error);
    }

    /// Make create and command calls wait until [`release_commands`](Self::release_commands).
    pub fn hold_commands(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_commands(&self, n: usize) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(n);
        }
    }

    /// Make fetches record their call and compute their answer, then wait
    /// until [`release_fetches`](Self::release_fetches) before returning it.
    pub fn hold_fetches(&self) {
        *self.fetch_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let every held fetch return. Later fetches are not held.
    pub fn release_fetches(&self) {
        if let Some(gate) = self.fetch_gate.lock().unwrap().take() {
            gate.close();
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Fetch(_)))
            .count()
    }

    pub fn command_count(&self, command: JobCommand) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Command(cmd, _) if *cmd == command))
            .count()
    }

    async fn wait_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
    }

    async fn command(
        &self,
        id: &JobId,
        command: JobCommand,
        apply: impl FnOnce(&mut JobSnapshot),
    ) -> Result<JobSnapshot, RemoteError> {
        self.state().calls.push(Call::Command(command, id.clone()));
        self.wait_gate().await;

        let mut state = self.state();
        if let Some(err) = state.rejections.get(&(id.clone(), command)) {
            return Err(err.clone());
        }
        let job = state.job_mut(id).ok_or(RemoteError::NotFound)?;
        apply(job);
        Ok(job.clone())
    }
}

#[async_trait]
impl RemoteJobService for FakeRemote {
    async fn create(&self, request: CreateJobRequest) -> Result<CreatedJob, RemoteError> {
        self.state()
            .calls
            .push(Call::Create(request.kind.as_str().to_string()));
        self.wait_gate().await;

        let mut state = self.state();
        if let Some(err) = state.create_error.clone() {
            return Err(err);
        }
        state.next_id += 1;
        let id = JobId::new(format!("srv-{}", state.next_id));
        let mut snapshot = JobSnapshot::new(id.clone(), JobStatus::Queued);
        snapshot.kind = Some(request.kind);
        state.jobs.push(snapshot);
        Ok(CreatedJob {
            id,
            status: JobStatus::Queued,
            created_at: Some(Utc::now()),
        })
    }

    async fn fetch(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        let result = {
            let mut state = self.state();
            state.calls.push(Call::Fetch(id.clone()));
            if state.fail_all_fetches {
                Err(RemoteError::Transport("connection refused".into()))
            } else if let Some(next) = state.scripted.get_mut(id).and_then(VecDeque::pop_front) {
                next
            } else {
                state.job_mut(id).cloned().ok_or(RemoteError::NotFound)
            }
        };

        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            // Closed on release; the error only means "go ahead".
            let _ = gate.acquire().await;
        }
        result
    }

    async fn list(&self) -> Result<Vec<JobSnapshot>, RemoteError> {
        let mut state = self.state();
        state.calls.push(Call::List);
        Ok(state.jobs.clone())
    }

    async fn retry(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        self.command(id, JobCommand::Retry, |job| {
            job.status = JobStatus::Queued;
            job.progress = Some(0.0);
            job.error = None;
            job.retry_count = Some(job.retry_count.unwrap_or(0) + 1);
            job.started_at = None;
            job.completed_at = None;
        })
        .await
    }

    async fn cancel(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        self.command(id, JobCommand::Cancel, |job| {
            job.status = JobStatus::Cancelled;
        })
        .await
    }

    async fn pause(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        self.command(id, JobCommand::Pause, |job| {
            job.status = JobStatus::Paused;
        })
        .await
    }

    async fn resume(&self, id: &JobId) -> Result<JobSnapshot, RemoteError> {
        self.command(id, JobCommand::Resume, |job| {
            job.status = JobStatus::Running;
        })
        .await
    }

    async fn delete(&self, id: &JobId) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.push(Call::Command(JobCommand::Delete, id.clone()));
        if let Some(err) = state.rejections.get(&(id.clone(), JobCommand::Delete)) {
            return Err(err.clone());
        }
        let before = state.jobs.len();
        state.jobs.retain(|j| j.id != *id);
        if state.jobs.len() == before {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

pub const INTERVAL_MS: u64 = 3_000;

pub fn config() -> TrackerConfig {
    TrackerConfig::default()
}

/// Tracker over `remote` with the default three second interval.
pub fn tracker(remote: &Arc<FakeRemote>) -> JobTracker {
    JobTracker::new(remote.clone(), config())
}

pub fn tracker_with(remote: &Arc<FakeRemote>, config: TrackerConfig) -> JobTracker {
    JobTracker::new(remote.clone(), config)
}

/// Let exactly one more poll tick run. Needs a paused clock; the extra
/// 10ms keeps the test's wake-up clear of the scheduler's deadline.
pub async fn next_tick() {
    tokio::time::sleep(std::time::Duration::from_millis(INTERVAL_MS + 10)).await;
}

pub async fn ticks(n: usize) {
    for _ in 0..n {
        next_tick().await;
    }
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap()
}

pub fn running(id: &str, progress: f64) -> JobSnapshot {
    JobSnapshot::new(id, JobStatus::Running).with_progress(progress)
}
