// crates/types/src/wire.rs
//! Payloads exchanged with the remote job service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{progress_from_counts, JobId, JobKind};
use crate::status::JobStatus;

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub kind: JobKind,
    pub params: serde_json::Value,
}

/// Response of `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedJob {
    pub id: JobId,
    #[serde(default = "queued")]
    pub status: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
}

fn queued() -> JobStatus {
    JobStatus::Queued
}

/// Server view of one job: the response of `GET /jobs/{id}` and of every
/// command endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    /// Import tasks report a float percentage, extraction jobs an integer.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub items_processed: Option<u64>,
    #[serde(default)]
    pub items_total: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub kind: Option<JobKind>,
}

impl JobSnapshot {
    /// Minimal snapshot, mostly useful for tests and fakes.
    pub fn new(id: impl Into<JobId>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            progress: None,
            items_processed: None,
            items_total: None,
            error: None,
            retry_count: None,
            started_at: None,
            completed_at: None,
            created_at: None,
            kind: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_items(mut self, processed: u64, total: u64) -> Self {
        self.items_processed = Some(processed);
        self.items_total = Some(total);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Progress the server is reporting, as a whole percentage.
    ///
    /// When the item counters disagree with the reported percentage by more
    /// than one point, the counters win.
    pub fn effective_progress(&self) -> Option<u8> {
        let reported = self
            .progress
            .filter(|p| p.is_finite())
            .map(|p| p.round().clamp(0.0, 100.0) as u8);
        let counted = match (self.items_processed, self.items_total) {
            (Some(processed), Some(total)) => progress_from_counts(processed, total),
            _ => None,
        };
        match (reported, counted) {
            (Some(r), Some(c)) if r.abs_diff(c) <= 1 => Some(r),
            (_, Some(c)) => Some(c),
            (r, None) => r,
        }
    }
}

/// Response of `GET /jobs`. The admin backend wraps the list and pages it,
/// newer services return it bare.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JobList {
    Bare(Vec<JobSnapshot>),
    Wrapped {
        jobs: Vec<JobSnapshot>,
        #[serde(default)]
        pagination: Option<Pagination>,
    },
}

/// Laravel-style page info (`?page=N`, 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    pub current_page: u32,
    pub last_page: u32,
}

impl JobList {
    /// Page to request next, if the server reported more.
    pub fn next_page(&self) -> Option<u32> {
        match self {
            JobList::Wrapped {
                pagination: Some(page),
                ..
            } if page.current_page < page.last_page => Some(page.current_page + 1),
            _ => None,
        }
    }

    pub fn into_jobs(self) -> Vec<JobSnapshot> {
        match self {
            JobList::Bare(jobs) | JobList::Wrapped { jobs, .. } => jobs,
        }
    }
}

/// Body of a command response that carries no job, and of a declined
/// command: `{"success": false, "message": "..."}` or `{"error": "..."}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectionBody {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RejectionBody {
    pub fn reason(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}
