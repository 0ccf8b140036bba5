// crates/core/src/subscription.rs
//! Change listeners for the rendering layer.
//!
//! Listeners receive the full job list after every visible change. They are
//! called after the tracker's state lock is released, so a listener may
//! call back into the tracker.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use console_jobs_types::JobRecord;

type Listener = Arc<dyn Fn(&[JobRecord]) + Send + Sync>;

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

/// Registered listeners, shared between the tracker and its [`Subscription`]s.
#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    inner: Arc<Mutex<ListenerSet>>,
}

impl Subscribers {
    pub(crate) fn add(&self, listener: Listener) -> Subscription {
        let mut set = lock(&self.inner);
        let id = set.next_id;
        set.next_id += 1;
        set.listeners.insert(id, listener);
        Subscription {
            id,
            set: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every listener with `jobs`, in subscription order.
    pub(crate) fn emit(&self, jobs: &[JobRecord]) {
        let listeners: Vec<Listener> = lock(&self.inner).listeners.values().cloned().collect();
        for listener in listeners {
            listener(jobs);
        }
    }

    pub(crate) fn clear(&self) {
        lock(&self.inner).listeners.clear();
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }
}

/// Handle returned by `JobTracker::subscribe`. Dropping it stops notifications.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    set: Weak<Mutex<ListenerSet>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            lock(&set).listeners.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

fn lock(set: &Mutex<ListenerSet>) -> MutexGuard<'_, ListenerSet> {
    set.lock().unwrap_or_else(|poisoned| {
        tracing::error!("subscriber lock poisoned, recovering");
        poisoned.into_inner()
    })
}
