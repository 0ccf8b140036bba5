// crates/types/src/command.rs
//! User-issued commands and their validity table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCommand {
    Retry,
    Cancel,
    Pause,
    Resume,
    Delete,
}

impl JobCommand {
    /// Whether the command may be issued against a job in `status`.
    pub fn allowed_from(self, status: JobStatus) -> bool {
        match self {
            JobCommand::Retry => status == JobStatus::Failed,
            JobCommand::Cancel => !status.is_terminal(),
            JobCommand::Pause => status == JobStatus::Running,
            JobCommand::Resume => status == JobStatus::Paused,
            JobCommand::Delete => status.is_terminal(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobCommand::Retry => "retry",
            JobCommand::Cancel => "cancel",
            JobCommand::Pause => "pause",
            JobCommand::Resume => "resume",
            JobCommand::Delete => "delete",
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
