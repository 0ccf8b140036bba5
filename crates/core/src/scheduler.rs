// crates/core/src/scheduler.rs
//! Poll scheduler: the watch set and the background task that drives it.
//!
//! One task per tracker. It sleeps for the poll interval, runs one tick, and
//! only then starts the next sleep, so slow responses never stack up. The
//! task holds a weak reference to the tracker and exits once the tracker is
//! shut down or dropped.

use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::{DateTime, Utc};
use console_jobs_types::{JobId, JobSnapshot};

use crate::error::{RemoteError, TrackingNotice};
use crate::metrics;
use crate::reconcile::{self, Reconciliation};
use crate::tracker::{Shared, TrackerState};

/// Jobs currently being polled, in the order they were watched.
#[derive(Debug, Default)]
pub(crate) struct Watchlist {
    ids: Vec<JobId>,
}

impl Watchlist {
    /// Returns `false` if the job was already watched.
    pub(crate) fn insert(&mut self, id: JobId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.ids.push(id);
        metrics::set_watched(self.ids.len());
        true
    }

    pub(crate) fn remove(&mut self, id: &JobId) -> bool {
        let before = self.ids.len();
        self.ids.retain(|watched| watched != id);
        if self.ids.len() == before {
            return false;
        }
        metrics::set_watched(self.ids.len());
        true
    }

    pub(crate) fn contains(&self, id: &JobId) -> bool {
        self.ids.contains(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let n = self.ids.len();
        self.ids.clear();
        metrics::set_watched(0);
        n
    }

    pub(crate) fn to_vec(&self) -> Vec<JobId> {
        self.ids.clone()
    }
}

/// Spawn the polling loop for `shared`.
pub(crate) fn spawn(shared: &Arc<Shared>) {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let token = shared.shutdown.clone();
    let interval = shared.config.poll_interval();

    tokio::spawn(async move {
        tracing::debug!(interval_ms = interval.as_millis() as u64, "poll scheduler started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let Some(shared) = weak.upgrade() else { break };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick(&shared) => {}
            }
        }
        tracing::debug!("poll scheduler stopped");
    });
}

/// Poll every eligible watched job once. Returns how many fetches were issued.
pub(crate) async fn tick(shared: &Shared) -> usize {
    let started = Instant::now();
    let now = Utc::now();

    let batch: Vec<(JobId, u64)> = {
        let mut state = shared.lock();
        let TrackerState { registry, watched } = &mut *state;
        watched
            .to_vec()
            .into_iter()
            .filter_map(|id| registry.stamp_poll(&id, now).map(|generation| (id, generation)))
            .collect()
    };
    if batch.is_empty() {
        return 0;
    }

    let ids: Vec<JobId> = batch.iter().map(|(id, _)| id.clone()).collect();
    let results = shared.remote.fetch_many(&ids).await;

    let now = Utc::now();
    let mut changed = false;
    let mut notices = Vec::new();
    {
        let mut state = shared.lock();
        for ((id, generation), result) in batch.iter().zip(results) {
            let (visible, notice) = apply_poll(&mut state, shared, id, *generation, result, now);
            changed |= visible;
            notices.extend(notice);
        }
    }

    metrics::record_tick(batch.len(), started.elapsed());
    for notice in notices {
        shared.publish(notice);
    }
    if changed {
        shared.notify();
    }
    batch.len()
}

/// Fold one poll result into the registry. Returns whether a renderer-visible
/// change happened, plus any notice to publish once the lock is released.
fn apply_poll(
    state: &mut TrackerState,
    shared: &Shared,
    id: &JobId,
    generation: u64,
    result: Result<JobSnapshot, RemoteError>,
    now: DateTime<Utc>,
) -> (bool, Option<TrackingNotice>) {
    let TrackerState { registry, watched } = state;

    let snapshot = match result {
        Ok(snapshot) => snapshot,
        Err(error) => {
            match registry.get(id) {
                Some(record) if !record.is_terminal() => {}
                _ => return (false, None),
            }
            metrics::record_transport_failure();
            let failures = registry.record_failure(id);
            let limit = shared.config.max_consecutive_failures;

            if limit.is_some_and(|max| failures >= max) {
                let Some(record) = registry.record_mut(id) else {
                    return (false, None);
                };
                reconcile::mark_tracking_lost(record, failures, now);
                watched.remove(id);
                metrics::record_tracking_lost();
                tracing::warn!(job_id = %id, failures, error = %error, "tracking lost");
                return (
                    true,
                    Some(TrackingNotice::TrackingLost {
                        id: id.clone(),
                        failures,
                    }),
                );
            }

            tracing::warn!(job_id = %id, consecutive = failures, error = %error, "status poll failed");
            return (
                false,
                Some(TrackingNotice::PollFailed {
                    id: id.clone(),
                    consecutive: failures,
                    error,
                }),
            );
        }
    };

    let Some(record) = registry.record_mut(id) else {
        return (false, None);
    };
    let outcome = reconcile::reconcile(record, &snapshot, generation, now);
    let terminal = record.is_terminal();
    registry.reset_failures(id);

    match outcome {
        Reconciliation::Applied { from, to } => {
            if from != to {
                tracing::info!(job_id = %id, %from, %to, "job status changed");
            }
            if terminal {
                watched.remove(id);
            }
            (true, None)
        }
        Reconciliation::Unchanged => (false, None),
        Reconciliation::Stale { generation, current } => {
            tracing::debug!(job_id = %id, generation, current, "discarding stale response");
            metrics::record_stale();
            (false, None)
        }
        Reconciliation::TerminalIgnored => {
            watched.remove(id);
            (false, None)
        }
        Reconciliation::InvalidTransition { from, to } => {
            tracing::warn!(job_id = %id, %from, %to, "server reported unreachable status");
            metrics::record_invalid_transition();
            (
                false,
                Some(TrackingNotice::InvalidTransition {
                    id: id.clone(),
                    from,
                    to,
                }),
            )
        }
    }
}
