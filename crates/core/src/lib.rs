// crates/core/src/lib.rs
//! Client-side tracking of long-running server jobs.
//!
//! A [`JobTracker`] keeps a local [`Registry`] of job records, polls the
//! [`RemoteJobService`] for every non-terminal job it watches, merges each
//! response through the [`reconcile`] rules, and exposes user commands
//! through a [`CommandDispatcher`]. Renderers subscribe to change
//! notifications and never mutate records themselves.

pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod reconcile;
pub mod registry;
pub mod remote;
mod scheduler;
pub mod subscription;
pub mod tracker;

pub use commands::CommandDispatcher;
pub use config::{ConsoleConfig, ServiceConfig, TrackerConfig};
pub use error::{ConfigError, RemoteError, TrackerError, TrackingNotice};
pub use http::HttpJobService;
pub use reconcile::Reconciliation;
pub use registry::Registry;
pub use remote::RemoteJobService;
pub use subscription::Subscription;
pub use tracker::JobTracker;

pub use console_jobs_types as types;
