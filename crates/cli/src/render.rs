// crates/cli/src/render.rs
//! Terminal rendering: a static table for `list` and live progress bars for
//! `watch`.

use std::collections::HashMap;
use std::fmt::Write as _;

use console_jobs_core::TrackingNotice;
use console_jobs_types::{JobId, JobRecord};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str = "{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}";

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// `running`, or `cancelled?` while the server has not confirmed it yet.
pub fn status_label(record: &JobRecord) -> String {
    if record.unconfirmed {
        format!("{}?", record.status)
    } else {
        record.status.to_string()
    }
}

/// Trailing detail for a job: counters, error, retries.
pub fn detail(record: &JobRecord) -> String {
    let mut out = status_label(record);
    if let (Some(done), Some(total)) = (record.items_processed, record.items_total) {
        let _ = write!(out, " {done}/{total}");
    }
    if record.retry_count > 0 {
        let _ = write!(out, " (retry {})", record.retry_count);
    }
    if let Some(error) = &record.error {
        let _ = write!(out, ": {error}");
    }
    out
}

pub fn table(records: &[JobRecord]) -> String {
    let id_width = records
        .iter()
        .map(|r| r.id.as_str().len())
        .max()
        .unwrap_or(0)
        .max(2);
    let kind_width = records
        .iter()
        .map(|r| r.kind.as_str().len())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = format!(
        "{:<id_width$}  {:<kind_width$}  {:<10}  {:>4}  {:>7}  ERROR\n",
        "ID", "KIND", "STATUS", "PCT", "RETRIES"
    );
    for record in records {
        let _ = writeln!(
            out,
            "{:<id_width$}  {:<kind_width$}  {:<10}  {:>3}%  {:>7}  {}",
            record.id.as_str(),
            record.kind.as_str(),
            status_label(record),
            record.progress,
            record.retry_count,
            record.error.as_deref().unwrap_or("-"),
        );
    }
    out
}

pub fn describe_notice(notice: &TrackingNotice) -> String {
    match notice {
        TrackingNotice::PollFailed {
            id,
            consecutive,
            error,
        } => format!("poll of {id} failed ({consecutive} in a row): {error}"),
        TrackingNotice::TrackingLost { id, failures } => {
            format!("lost track of {id} after {failures} failed polls")
        }
        TrackingNotice::ConfirmationFailed { id, error } => {
            format!("could not confirm the new state of {id}: {error}")
        }
        TrackingNotice::InvalidTransition { id, from, to } => {
            format!("ignored impossible change of {id} from {from} to {to}")
        }
    }
}

/// One progress bar per job, kept in sync with the tracker's job list.
pub struct ProgressBoard {
    multi: MultiProgress,
    bars: HashMap<JobId, ProgressBar>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
        }
    }

    /// Add bars for new jobs, update the rest and drop bars whose job is
    /// gone (deleted, or a placeholder that got its server id).
    pub fn update(&mut self, records: &[JobRecord]) {
        self.bars.retain(|id, bar| {
            let keep = records.iter().any(|r| r.id == *id);
            if !keep {
                self.multi.remove(bar);
            }
            keep
        });

        for record in records {
            let bar = self.bars.entry(record.id.clone()).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(bar_style());
                bar.set_prefix(format!("{} {}", record.kind, record.id));
                bar
            });
            bar.set_position(u64::from(record.progress));
            bar.set_message(detail(record));
            if record.is_terminal() && !bar.is_finished() {
                bar.finish();
            }
        }
    }

    /// Print a line above the bars.
    pub fn println(&self, line: &str) {
        if self.multi.println(line).is_err() {
            tracing::warn!("{line}");
        }
    }

    pub fn finish(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether every job in `records` (or the single `only` job) has finished.
pub fn done(records: &[JobRecord], only: Option<&JobId>) -> bool {
    match only {
        Some(id) => records
            .iter()
            .find(|r| r.id == *id)
            .map_or(true, JobRecord::is_terminal),
        None => records.iter().all(JobRecord::is_terminal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use console_jobs_core::RemoteError;
    use console_jobs_types::{JobKind, JobStatus};
    use pretty_assertions::assert_eq;

    fn record(id: &str, status: JobStatus, progress: u8) -> JobRecord {
        let mut record = JobRecord::new(
            JobId::new(id),
            JobKind::new("extraction"),
            serde_json::json!({}),
            Utc::now(),
        );
        record.status = status;
        record.progress = progress;
        record
    }

    #[test]
    fn test_detail_shows_counters_retries_and_error() {
        let mut failed = record("a", JobStatus::Failed, 40);
        failed.items_processed = Some(4);
        failed.items_total = Some(10);
        failed.retry_count = 2;
        failed.error = Some("disk full".into());
        assert_eq!(detail(&failed), "failed 4/10 (retry 2): disk full");

        let mut cancelling = record("b", JobStatus::Cancelled, 10);
        cancelling.unconfirmed = true;
        assert_eq!(detail(&cancelling), "cancelled?");
    }

    #[test]
    fn test_table_has_a_row_per_job() {
        let text = table(&[
            record("job-1", JobStatus::Running, 35),
            record("job-22", JobStatus::Completed, 100),
        ]);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("running"));
        assert!(lines[1].contains(" 35%"));
        assert!(lines[2].contains("100%"));
        assert!(lines[2].ends_with('-'));
    }

    #[test]
    fn test_board_follows_the_job_list() {
        let mut board = ProgressBoard::hidden();
        board.update(&[
            record("a", JobStatus::Running, 10),
            record("b", JobStatus::Queued, 0),
        ]);
        assert_eq!(board.bars.len(), 2);

        board.update(&[record("a", JobStatus::Completed, 100)]);
        assert_eq!(board.bars.len(), 1);
        assert!(board.bars[&JobId::new("a")].is_finished());
        assert_eq!(board.bars[&JobId::new("a")].position(), 100);
    }

    #[test]
    fn test_done_checks_one_job_or_all() {
        let jobs = [
            record("a", JobStatus::Completed, 100),
            record("b", JobStatus::Running, 5),
        ];
        assert!(done(&jobs, Some(&JobId::new("a"))));
        assert!(!done(&jobs, Some(&JobId::new("b"))));
        assert!(!done(&jobs, None));
        assert!(done(&jobs[..1], None));
    }

    #[test]
    fn test_notices_read_as_sentences() {
        let text = describe_notice(&TrackingNotice::PollFailed {
            id: JobId::new("a"),
            consecutive: 2,
            error: RemoteError::Transport("timeout".into()),
        });
        assert_eq!(text, "poll of a failed (2 in a row): transport error: timeout");
    }
}
