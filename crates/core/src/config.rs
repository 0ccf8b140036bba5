// crates/core/src/config.rs
//! Tracker and remote service configuration.
//!
//! Values come from, in increasing priority: built-in defaults, an optional
//! TOML file, then `JOBS_*` environment variables. The CLI applies its own
//! flags on top.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Lower bound on the poll interval; anything faster hammers the backend.
const MIN_POLL_INTERVAL_MS: u64 = 100;

/// How the tracker polls and gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Delay between the end of one poll tick and the start of the next.
    pub poll_interval_ms: u64,
    /// Consecutive transport failures after which a job is marked failed
    /// with a "tracking lost" error. `None` keeps polling forever.
    pub max_consecutive_failures: Option<u32>,
    /// Capacity of the broadcast channel carrying [`TrackingNotice`](crate::TrackingNotice)s.
    pub notice_capacity: usize,
}

impl TrackerConfig {
    /// Never shorter than [`MIN_POLL_INTERVAL_MS`], whatever was configured.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = Some(max);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid {
                key: "poll_interval_ms",
                message: format!("must be at least {MIN_POLL_INTERVAL_MS}"),
            });
        }
        if self.max_consecutive_failures == Some(0) {
            return Err(ConfigError::Invalid {
                key: "max_consecutive_failures",
                message: "must be at least 1 (omit it for unbounded)".into(),
            });
        }
        if self.notice_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "notice_capacity",
                message: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            max_consecutive_failures: None,
            notice_capacity: 64,
        }
    }
}

/// Where the remote job service lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/admin".into(),
            api_token: None,
            request_timeout_ms: 10_000,
        }
    }
}

/// Full configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub service: ServiceConfig,
    pub tracker: TrackerConfig,
}

impl ConsoleConfig {
    /// Load from an optional TOML file, then apply `JOBS_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.tracker.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("JOBS_BASE_URL") {
            self.service.base_url = url;
        }
        if let Some(token) = lookup("JOBS_API_TOKEN") {
            self.service.api_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(raw) = lookup("JOBS_REQUEST_TIMEOUT_MS") {
            self.service.request_timeout_ms = parse_number("JOBS_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("JOBS_POLL_INTERVAL_MS") {
            self.tracker.poll_interval_ms = parse_number("JOBS_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("JOBS_MAX_FAILURES") {
            self.tracker.max_consecutive_failures = match raw.trim() {
                "" | "unbounded" => None,
                n => Some(parse_number("JOBS_MAX_FAILURES", n)?),
            };
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("{raw:?}: {e}"),
    })
}
