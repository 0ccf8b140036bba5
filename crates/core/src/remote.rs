// crates/core/src/remote.rs
//! RemoteJobService trait: the only way the tracker talks to the backend.

use async_trait::async_trait;
use console_jobs_types::{CreateJobRequest, CreatedJob, JobId, JobSnapshot};
use futures_util::future::join_all;

use crate::error::RemoteError;

/// Contract the tracker consumes. Every operation may fail with a
/// [`RemoteError`]; transport-level failures must never be reported as a
/// job status.
///
/// Implementations include:
/// - [`HttpJobService`](crate::HttpJobService), the REST backend
/// - scripted fakes in the integration tests
#[async_trait]
pub trait RemoteJobService: Send + Sync {
    /// Submit new work. The server assigns the id.
    async fn create(&self, request: CreateJobRequest) -> Result<CreatedJob, RemoteError>;

    /// Current status of one job.
    async fn fetch(&self, id: &JobId) -> Result<JobSnapshot, RemoteError>;

    /// Status of several jobs, one result per id in input order.
    ///
    /// The default issues individual fetches concurrently; services with a
    /// bulk endpoint can override it.
    async fn fetch_many(&self, ids: &[JobId]) -> Vec<Result<JobSnapshot, RemoteError>> {
        join_all(ids.iter().map(|id| self.fetch(id))).await
    }

    /// Every job the server knows about, for the initial load.
    async fn list(&self) -> Result<Vec<JobSnapshot>, RemoteError>;

    async fn retry(&self, id: &JobId) -> Result<JobSnapshot, RemoteError>;

    async fn cancel(&self, id: &JobId) -> Result<JobSnapshot, RemoteError>;

    async fn pause(&self, id: &JobId) -> Result<JobSnapshot, RemoteError>;

    async fn resume(&self, id: &JobId) -> Result<JobSnapshot, RemoteError>;

    /// Delete a terminal job. A job the server no longer knows is reported
    /// as [`RemoteError::NotFound`].
    async fn delete(&self, id: &JobId) -> Result<(), RemoteError>;

    /// Service name for logging (e.g. "http").
    fn name(&self) -> &str;
}
