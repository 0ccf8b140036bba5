// crates/core/src/metrics.rs
//! Tracker metrics, recorded through the `metrics` facade.
//!
//! Nothing is exported unless the host installs a recorder (`jobctl
//! --metrics-addr` installs the Prometheus one). Without a recorder every
//! call here is a no-op.

use std::time::Duration;

use console_jobs_types::JobCommand;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Register descriptions for every tracker metric. Call once after the
/// recorder is installed.
pub fn describe_metrics() {
    describe_counter!("jobs_polls_total", "Status fetches issued by the poll scheduler");
    describe_counter!(
        "jobs_stale_responses_total",
        "Responses discarded because a newer generation was already applied"
    );
    describe_counter!(
        "jobs_transport_failures_total",
        "Status fetches that failed before producing a job status"
    );
    describe_counter!(
        "jobs_invalid_transitions_total",
        "Responses reporting a status unreachable from the local one"
    );
    describe_counter!("jobs_tracking_lost_total", "Jobs given up after repeated transport failures");
    describe_counter!("jobs_commands_total", "User commands by command and outcome");
    describe_histogram!("jobs_poll_tick_seconds", "Duration of one poll tick in seconds");
    describe_gauge!("jobs_watched", "Jobs currently in the watch set");
}

pub(crate) fn record_tick(polled: usize, duration: Duration) {
    counter!("jobs_polls_total").increment(polled as u64);
    histogram!("jobs_poll_tick_seconds").record(duration.as_secs_f64());
}

pub(crate) fn set_watched(watched: usize) {
    gauge!("jobs_watched").set(watched as f64);
}

pub(crate) fn record_stale() {
    counter!("jobs_stale_responses_total").increment(1);
}

pub(crate) fn record_transport_failure() {
    counter!("jobs_transport_failures_total").increment(1);
}

pub(crate) fn record_invalid_transition() {
    counter!("jobs_invalid_transitions_total").increment(1);
}

pub(crate) fn record_tracking_lost() {
    counter!("jobs_tracking_lost_total").increment(1);
}

/// `outcome` is one of "accepted", "rejected", "invalid", "error".
pub(crate) fn record_command(command: JobCommand, outcome: &'static str) {
    counter!("jobs_commands_total", "command" => command.as_str(), "outcome" => outcome)
        .increment(1);
}
