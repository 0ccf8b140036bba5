// crates/types/src/status.rs
//! Job lifecycle states and the transition table between them.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Lifecycle status of a tracked job.
///
/// The admin backend still reports the legacy names `pending` and
/// `processing` for extraction jobs; both are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[serde(alias = "pending")]
    Queued,
    #[serde(alias = "processing")]
    Running,
    Paused,
    Completed,
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Completed, failed and cancelled jobs never change on their own again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Direct edges of the state machine, excluding the self-loop on `Running`.
    ///
    /// `Failed -> Queued` is only ever taken by an accepted retry command.
    fn edges(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Queued => &[JobStatus::Running, JobStatus::Cancelled],
            JobStatus::Running => &[
                JobStatus::Paused,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ],
            JobStatus::Paused => &[JobStatus::Running, JobStatus::Cancelled],
            JobStatus::Failed => &[JobStatus::Queued],
            JobStatus::Completed | JobStatus::Cancelled => &[],
        }
    }

    /// Whether `self -> next` is a single edge of the state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        (self == JobStatus::Running && next == JobStatus::Running) || self.edges().contains(&next)
    }

    /// Route from `self` to a status observed by a poll.
    ///
    /// Polling samples the server, so several edges may have been taken
    /// between two ticks (`queued -> running -> completed`). The route only
    /// passes through non-terminal intermediate states and never uses the
    /// retry edge. Returns the states entered after `self`, ending with
    /// `observed`; an empty route means "same status". `None` when the
    /// observation is unreachable.
    pub fn observed_path(self, observed: JobStatus) -> Option<Vec<JobStatus>> {
        if self.is_terminal() {
            return None;
        }
        if self == observed {
            return Some(Vec::new());
        }

        let mut previous: [Option<JobStatus>; 6] = [None; 6];
        let mut seen = [false; 6];
        let mut queue = VecDeque::from([self]);
        seen[self.index()] = true;

        while let Some(current) = queue.pop_front() {
            if current.is_terminal() {
                continue;
            }
            for &next in current.edges() {
                if seen[next.index()] {
                    continue;
                }
                seen[next.index()] = true;
                previous[next.index()] = Some(current);
                if next == observed {
                    let mut path = vec![next];
                    let mut cursor = current;
                    while cursor != self {
                        path.push(cursor);
                        cursor = previous[cursor.index()]?;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
