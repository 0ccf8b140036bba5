// crates/core/src/error.rs
use console_jobs_types::{JobCommand, JobId, JobKind, JobStatus};
use thiserror::Error;

/// Errors returned by a [`RemoteJobService`](crate::RemoteJobService).
///
/// Messages are kept as strings so the error can be cloned onto the
/// broadcast notice channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The request never produced a usable HTTP response (connect, timeout, 5xx).
    #[error("transport error: {0}")]
    Transport(String),

    /// The service understood the request and declined it.
    #[error("rejected by server: {reason}")]
    Rejected { reason: String },

    #[error("job not found on server")]
    NotFound,

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors surfaced synchronously to the caller of a tracker operation.
///
/// None of these are ever written into a [`JobRecord`](console_jobs_types::JobRecord).
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {0} is still being created")]
    PendingCreation(JobId),

    #[error("cannot {command} job {id} while it is {status}")]
    InvalidCommand {
        id: JobId,
        command: JobCommand,
        status: JobStatus,
    },

    #[error("cannot {command} job {id}: {pending} is still awaiting the server")]
    CommandInFlight {
        id: JobId,
        command: JobCommand,
        pending: JobCommand,
    },

    #[error("server declined to {command} job {id}: {reason}")]
    Rejected {
        id: JobId,
        command: JobCommand,
        reason: String,
    },

    #[error("failed to {command} job {id}: {source}")]
    Remote {
        id: JobId,
        command: JobCommand,
        #[source]
        source: RemoteError,
    },

    #[error("failed to create {kind} job: {source}")]
    Create {
        kind: JobKind,
        #[source]
        source: RemoteError,
    },

    #[error("failed to load jobs: {0}")]
    Load(#[source] RemoteError),
}

impl TrackerError {
    /// Classify a failed command call.
    pub(crate) fn from_remote(id: &JobId, command: JobCommand, err: RemoteError) -> Self {
        match err {
            RemoteError::Rejected { reason } => Self::Rejected {
                id: id.clone(),
                command,
                reason,
            },
            source => Self::Remote {
                id: id.clone(),
                command,
                source,
            },
        }
    }

    /// Whether the error was raised locally, before any request was sent.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::PendingCreation(_)
                | Self::InvalidCommand { .. }
                | Self::CommandInFlight { .. }
        )
    }
}

/// Problems reported on the tracker's side channel rather than to a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingNotice {
    /// A status poll failed at the transport level. Job status is untouched.
    PollFailed {
        id: JobId,
        consecutive: u32,
        error: RemoteError,
    },
    /// Transport failures persisted past the configured limit; the job was
    /// marked failed and is no longer polled.
    TrackingLost { id: JobId, failures: u32 },
    /// The fetch that confirms a cancel did not succeed. The record takes the
    /// cancel response instead, or is rolled back if that failed too.
    ConfirmationFailed { id: JobId, error: RemoteError },
    /// A poll reported a status the state machine cannot reach.
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
