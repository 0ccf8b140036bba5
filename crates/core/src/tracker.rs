// crates/core/src/tracker.rs
//! `JobTracker`: the handle the rendering layer holds.
//!
//! Owns the registry, the watch set, the poll scheduler task, the change
//! listeners and the notice channel. Cloning is cheap; every clone shares
//! the same state. Dropping the last clone stops polling.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use console_jobs_types::{CreateJobRequest, JobCommand, JobId, JobKind, JobRecord, JobSnapshot};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::commands::CommandDispatcher;
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackingNotice};
use crate::reconcile;
use crate::registry::Registry;
use crate::remote::RemoteJobService;
use crate::scheduler::{self, Watchlist};
use crate::subscription::{Subscribers, Subscription};

/// Everything guarded by the tracker's single mutex.
#[derive(Debug, Default)]
pub(crate) struct TrackerState {
    pub(crate) registry: Registry,
    pub(crate) watched: Watchlist,
}

pub(crate) struct Shared {
    state: Mutex<TrackerState>,
    pub(crate) remote: Arc<dyn RemoteJobService>,
    pub(crate) config: TrackerConfig,
    subscribers: Subscribers,
    notices: broadcast::Sender<TrackingNotice>,
    pub(crate) shutdown: CancellationToken,
}

impl Shared {
    /// Lock the tracker state. Never hold the guard across an `.await`.
    pub(crate) fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("tracker state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Hand the current job list to every listener.
    pub(crate) fn notify(&self) {
        let jobs = self.lock().registry.list();
        self.subscribers.emit(&jobs);
    }

    pub(crate) fn publish(&self, notice: TrackingNotice) {
        // No receivers is fine; notices are best-effort.
        let _ = self.notices.send(notice);
    }

    /// Add `id` to the watch set unless the tracker is shut down or the job
    /// cannot be polled.
    pub(crate) fn watch_locked(&self, state: &mut TrackerState, id: &JobId) -> bool {
        if self.shutdown.is_cancelled() || id.is_placeholder() {
            return false;
        }
        match state.registry.get(id) {
            Some(record) if !record.is_terminal() => {
                state.watched.insert(id.clone());
                true
            }
            _ => false,
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Clone)]
pub struct JobTracker {
    shared: Arc<Shared>,
}

impl JobTracker {
    /// Create a tracker and spawn its poll scheduler. Must be called from
    /// within a tokio runtime.
    pub fn new(remote: Arc<dyn RemoteJobService>, config: TrackerConfig) -> Self {
        if let Err(err) = config.validate() {
            tracing::warn!(error = %err, "tracker config out of range, clamping");
        }
        let (notices, _) = broadcast::channel(config.notice_capacity.max(1));
        tracing::debug!(
            service = remote.name(),
            poll_interval_ms = config.poll_interval_ms,
            max_failures = ?config.max_consecutive_failures,
            "creating job tracker"
        );
        let shared = Arc::new(Shared {
            state: Mutex::new(TrackerState::default()),
            remote,
            config,
            subscribers: Subscribers::default(),
            notices,
            shutdown: CancellationToken::new(),
        });
        scheduler::spawn(&shared);
        Self { shared }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    // -- Jobs ----------------------------------------------------------------

    /// Submit a new job. A queued record with a placeholder id is visible to
    /// listeners right away; once the server answers it is re-keyed to the
    /// server id and watched. If the server refuses, the placeholder is
    /// removed and the error returned.
    pub async fn start(
        &self,
        kind: impl Into<JobKind>,
        params: serde_json::Value,
    ) -> Result<JobRecord, TrackerError> {
        let kind = kind.into();
        let placeholder = self
            .shared
            .lock()
            .registry
            .create(kind.clone(), params.clone(), Utc::now());
        self.shared.notify();

        let request = CreateJobRequest {
            kind: kind.clone(),
            params,
        };
        let created = match self.shared.remote.create(request).await {
            Ok(created) => created,
            Err(source) => {
                self.shared.lock().registry.remove(&placeholder.id);
                self.shared.notify();
                tracing::warn!(%kind, error = %source, "job creation failed");
                return Err(TrackerError::Create { kind, source });
            }
        };

        let record = {
            let mut state = self.shared.lock();
            let Some(mut record) = state.registry.confirm_id(&placeholder.id, &created) else {
                return Err(TrackerError::NotFound(placeholder.id));
            };
            if created.status != record.status {
                let generation = state.registry.next_generation(&record.id);
                if let (Some(generation), Some(current)) =
                    (generation, state.registry.record_mut(&record.id))
                {
                    let snapshot = JobSnapshot::new(record.id.clone(), created.status);
                    reconcile::reconcile(current, &snapshot, generation, Utc::now());
                    record = current.clone();
                }
            }
            self.shared.watch_locked(&mut state, &record.id);
            record
        };

        tracing::info!(job_id = %record.id, %kind, "job started");
        self.shared.notify();
        Ok(record)
    }

    /// Load every job the server knows about. Jobs already tracked are left
    /// alone; new ones are added in creation order and the non-terminal ones
    /// watched. Returns how many records were added.
    pub async fn load_existing(&self) -> Result<usize, TrackerError> {
        let mut snapshots = self
            .shared
            .remote
            .list()
            .await
            .map_err(TrackerError::Load)?;
        snapshots.sort_by_key(|s| s.created_at);

        let now = Utc::now();
        let added = {
            let mut state = self.shared.lock();
            let mut added = 0;
            for snapshot in &snapshots {
                if let Some(record) = state.registry.insert_snapshot(snapshot, now) {
                    self.shared.watch_locked(&mut state, &record.id);
                    added += 1;
                }
            }
            added
        };

        tracing::info!(loaded = added, total = snapshots.len(), "loaded existing jobs");
        if added > 0 {
            self.shared.notify();
        }
        Ok(added)
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.shared.lock().registry.get(id).cloned()
    }

    /// All tracked jobs in creation order.
    pub fn list(&self) -> Vec<JobRecord> {
        self.shared.lock().registry.list()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Command awaiting the server for `id`. Renderers use it to disable
    /// controls while a request is pending.
    pub fn in_flight(&self, id: &JobId) -> Option<JobCommand> {
        self.shared.lock().registry.in_flight(id)
    }

    /// Whether every tracked job has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.shared
            .lock()
            .registry
            .list()
            .iter()
            .all(JobRecord::is_terminal)
    }

    /// Drop every record and stop polling them, without stopping the tracker.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.shared.lock();
            state.watched.clear();
            state.registry.clear()
        };
        if removed > 0 {
            self.shared.notify();
        }
        removed
    }

    // -- Polling -------------------------------------------------------------

    /// Start polling `id`. Idempotent. Returns `false` for unknown,
    /// placeholder or terminal jobs, and after shutdown.
    pub fn watch(&self, id: &JobId) -> bool {
        let mut state = self.shared.lock();
        self.shared.watch_locked(&mut state, id)
    }

    pub fn unwatch(&self, id: &JobId) -> bool {
        self.shared.lock().watched.remove(id)
    }

    /// Stop polling every job. Records stay in the registry.
    pub fn unwatch_all(&self) -> usize {
        self.shared.lock().watched.clear()
    }

    pub fn watched(&self) -> Vec<JobId> {
        self.shared.lock().watched.to_vec()
    }

    pub fn is_watched(&self, id: &JobId) -> bool {
        self.shared.lock().watched.contains(id)
    }

    /// Run one poll tick immediately. Returns how many fetches were issued.
    pub async fn poll_now(&self) -> usize {
        if self.shared.shutdown.is_cancelled() {
            return 0;
        }
        scheduler::tick(&self.shared).await
    }

    // -- Listeners -----------------------------------------------------------

    /// Call `on_change` with the full job list after every visible change.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(&[JobRecord]) + Send + Sync + 'static,
    {
        self.shared.subscribers.add(Arc::new(on_change))
    }

    /// Poll failures, lost tracking and other problems that are not the
    /// answer to any particular call.
    pub fn errors(&self) -> broadcast::Receiver<TrackingNotice> {
        self.shared.notices.subscribe()
    }

    // -- Commands ------------------------------------------------------------

    pub fn commands(&self) -> CommandDispatcher {
        CommandDispatcher::new(self.shared.clone())
    }

    pub async fn retry(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        self.commands().retry(id).await
    }

    pub async fn cancel(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        self.commands().cancel(id).await
    }

    pub async fn pause(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        self.commands().pause(id).await
    }

    pub async fn resume(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        self.commands().resume(id).await
    }

    pub async fn delete(&self, id: &JobId) -> Result<JobRecord, TrackerError> {
        self.commands().delete(id).await
    }

    // -- Teardown ------------------------------------------------------------

    /// Stop polling for good: unwatch everything, stop the scheduler task and
    /// drop all listeners. Records stay readable.
    pub fn shutdown(&self) {
        let unwatched = self.shared.lock().watched.clear();
        self.shared.shutdown.cancel();
        self.shared.subscribers.clear();
        tracing::debug!(unwatched, "job tracker shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("JobTracker")
            .field("service", &self.shared.remote.name())
            .field("jobs", &state.registry.len())
            .field("watched", &state.watched.len())
            .finish()
    }
}
