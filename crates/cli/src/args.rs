// crates/cli/src/args.rs
//! Command line interface of `jobctl`.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console_jobs_core::ConsoleConfig;
use console_jobs_observability::LogConfig;
use console_jobs_types::{JobCommand, JobId};

/// jobctl - watch and control long-running server jobs
#[derive(Parser, Debug)]
#[command(name = "jobctl", version)]
#[command(about = "Track, retry and cancel long-running server jobs", long_about = None)]
pub struct Cli {
    /// TOML configuration file ([service] and [tracker] tables)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Job service base URL (e.g. http://localhost:8000/api/admin)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Consecutive poll failures before a job is marked "tracking lost"
    #[arg(long, global = true, value_name = "N")]
    pub max_failures: Option<u32>,

    /// Log JSON lines to stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write a daily-rotated log file into this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9464)
    #[arg(long, global = true, value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List every job the server knows about
    List {
        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show live progress for all jobs until Ctrl-C
    Watch {
        /// Exit once every job is completed, failed or cancelled
        #[arg(long)]
        exit_when_done: bool,
    },
    /// Submit a new job
    Start {
        /// Job kind (e.g. extraction, import, backup)
        kind: String,
        /// Job parameters as a JSON object
        #[arg(long, value_name = "JSON")]
        params: Option<String>,
        /// Keep showing progress until the job finishes
        #[arg(long)]
        follow: bool,
    },
    /// Re-queue a failed job
    Retry { id: String },
    /// Cancel a queued, running or paused job
    Cancel { id: String },
    /// Pause a running job
    Pause { id: String },
    /// Resume a paused job
    Resume { id: String },
    /// Delete a finished job
    Delete { id: String },
}

impl Command {
    /// The job command and target for the single-job subcommands.
    pub fn job_command(&self) -> Option<(JobCommand, JobId)> {
        let (command, id) = match self {
            Command::Retry { id } => (JobCommand::Retry, id),
            Command::Cancel { id } => (JobCommand::Cancel, id),
            Command::Pause { id } => (JobCommand::Pause, id),
            Command::Resume { id } => (JobCommand::Resume, id),
            Command::Delete { id } => (JobCommand::Delete, id),
            Command::List { .. } | Command::Watch { .. } | Command::Start { .. } => return None,
        };
        Some((command, JobId::new(id.as_str())))
    }
}

impl Cli {
    /// Defaults, then the config file, then `JOBS_*` variables, then flags.
    pub fn resolve_config(&self) -> anyhow::Result<ConsoleConfig> {
        let mut config = ConsoleConfig::load(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        config.tracker.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut ConsoleConfig) {
        if let Some(url) = &self.base_url {
            config.service.base_url = url.clone();
        }
        if let Some(token) = &self.token {
            config.service.api_token = Some(token.clone());
        }
        if let Some(ms) = self.interval_ms {
            config.tracker.poll_interval_ms = ms;
        }
        if let Some(n) = self.max_failures {
            config.tracker.max_consecutive_failures = Some(n);
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            json: self.log_json,
            log_dir: self.log_dir.clone(),
            ..LogConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from([
            "jobctl",
            "watch",
            "--exit-when-done",
            "--interval-ms",
            "2000",
            "--base-url",
            "http://127.0.0.1:8000/api",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Command::Watch {
                exit_when_done: true
            }
        );
        let mut config = ConsoleConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.tracker.poll_interval_ms, 2000);
        assert_eq!(config.service.base_url, "http://127.0.0.1:8000/api");
        assert_eq!(config.tracker.max_consecutive_failures, None);
    }

    #[test]
    fn test_start_takes_kind_and_params() {
        let cli = Cli::try_parse_from([
            "jobctl",
            "start",
            "extraction",
            "--params",
            r#"{"url":"https://example.com/v/1"}"#,
            "--follow",
        ])
        .unwrap();

        match cli.command {
            Command::Start {
                kind,
                params,
                follow,
            } => {
                assert_eq!(kind, "extraction");
                assert!(params.unwrap().contains("example.com"));
                assert!(follow);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_single_job_commands_map_to_job_command() {
        let cli = Cli::try_parse_from(["jobctl", "retry", "job-42", "--max-failures", "5"]).unwrap();
        assert_eq!(
            cli.command.job_command(),
            Some((JobCommand::Retry, JobId::new("job-42")))
        );
        assert_eq!(cli.max_failures, Some(5));

        let list = Cli::try_parse_from(["jobctl", "list", "--json"]).unwrap();
        assert_eq!(list.command.job_command(), None);
    }

    #[test]
    fn test_metrics_addr_must_be_a_socket_address() {
        assert!(Cli::try_parse_from(["jobctl", "--metrics-addr", "nope", "list"]).is_err());
        let cli =
            Cli::try_parse_from(["jobctl", "--metrics-addr", "127.0.0.1:9464", "list"]).unwrap();
        assert_eq!(cli.metrics_addr.unwrap().port(), 9464);
    }
}
