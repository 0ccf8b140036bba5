// crates/types/src/job.rs
//! The Job Record and its identifiers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::status::JobStatus;

/// Prefix of ids assigned locally while the server has not yet confirmed creation.
const PLACEHOLDER_PREFIX: &str = "local-";

/// Opaque job identifier assigned by the remote job service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh local id used until the server answers the create call.
    pub fn placeholder() -> Self {
        Self(format!("{PLACEHOLDER_PREFIX}{}", ulid::Ulid::new()))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What a job does (`extraction`, `import`, `backup`, `batch-update`, ...).
/// Carried opaquely; the tracker never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobKind {
    fn default() -> Self {
        Self::new("unknown")
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobKind {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One tracked unit of asynchronous server work, as shown to renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    /// Creation parameters, passed through untouched.
    pub params: serde_json::Value,
    pub status: JobStatus,
    /// 0–100. Only `Completed` jobs sit at 100.
    pub progress: u8,
    #[ts(type = "number | null")]
    pub items_processed: Option<u64>,
    #[ts(type = "number | null")]
    pub items_total: Option<u64>,
    pub created_at: DateTime<Utc>,
    /// Start of the current attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// End of the current attempt.
    pub completed_at: Option<DateTime<Utc>>,
    /// Present exactly when `status` is `Failed`.
    pub error: Option<String>,
    pub retry_count: u32,
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Highest poll generation whose response has been applied.
    #[ts(type = "number")]
    pub poll_generation: u64,
    /// The status is a local optimistic value the server has not confirmed yet.
    pub unconfirmed: bool,
}

impl JobRecord {
    /// A freshly created, queued record.
    pub fn new(
        id: JobId,
        kind: JobKind,
        params: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            params,
            status: JobStatus::Queued,
            progress: 0,
            items_processed: None,
            items_total: None,
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            last_polled_at: None,
            poll_generation: 0,
            unconfirmed: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress implied by the item counters, when there are any.
    pub fn counted_progress(&self) -> Option<u8> {
        match (self.items_processed, self.items_total) {
            (Some(processed), Some(total)) => progress_from_counts(processed, total),
            _ => None,
        }
    }
}

/// `round(100 * processed / total)`, clamped to 100. `None` when `total` is 0.
pub fn progress_from_counts(processed: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (processed.min(total) as f64 * 100.0 / total as f64).round();
    Some(pct.clamp(0.0, 100.0) as u8)
}
