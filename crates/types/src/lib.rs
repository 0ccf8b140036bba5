// crates/types/src/lib.rs
//! Data model shared by the job tracker and its rendering layers.
//!
//! - [`JobRecord`]: one tracked unit of asynchronous server work
//! - [`JobStatus`]: the lifecycle state machine
//! - [`JobCommand`]: user intents and the statuses they are valid from
//! - [`wire`]: payloads exchanged with the remote job service

pub mod command;
pub mod job;
pub mod status;
pub mod wire;

pub use command::JobCommand;
pub use job::{progress_from_counts, JobId, JobKind, JobRecord};
pub use status::JobStatus;
pub use wire::{CreateJobRequest, CreatedJob, JobList, JobSnapshot, Pagination, RejectionBody};
