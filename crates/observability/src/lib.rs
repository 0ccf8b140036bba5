// crates/observability/src/lib.rs
//! Logging and error reporting setup for the console-jobs binaries.
//!
//! One call to [`init_tracing`] installs the global subscriber:
//! - stderr output, compact or JSON lines
//! - an optional daily-rotated JSON log file (`tracing-appender`)
//! - a Sentry layer when a DSN is configured
//!
//! `RUST_LOG` overrides the default filter.

use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Filter used when `RUST_LOG` is unset or empty.
pub const DEFAULT_FILTER: &str = "warn,console_jobs=info,jobctl=info";

const LOG_FILE_PREFIX: &str = "jobctl.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Emit JSON lines on stderr instead of compact text.
    pub json: bool,
    /// Directory for the rotated log file. `None` disables file logging.
    pub log_dir: Option<PathBuf>,
    pub default_filter: String,
    /// Sentry DSN. Empty or `None` disables Sentry.
    pub sentry_dsn: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            log_dir: None,
            default_filter: DEFAULT_FILTER.to_string(),
            sentry_dsn: std::env::var("SENTRY_DSN").ok(),
        }
    }
}

/// Keeps background writers alive. Drop it last, on shutdown, so buffered
/// log lines and Sentry events are flushed.
#[must_use = "dropping the guard stops file logging and Sentry reporting"]
pub struct LogGuard {
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Build the filter from `directives` (normally `RUST_LOG`), falling back
/// to `default` when they are absent or blank.
pub fn build_filter(directives: Option<&str>, default: &str) -> anyhow::Result<EnvFilter> {
    let directives = directives
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(default);
    EnvFilter::try_new(directives)
        .with_context(|| format!("invalid tracing filter '{directives}'"))
}

/// Install the global tracing subscriber.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<LogGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };
    layers.push(console);

    let file_guard = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    let sentry_guard = match config.sentry_dsn.as_deref().map(str::trim) {
        Some(dsn) if !dsn.is_empty() => {
            let guard = sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    traces_sample_rate: 0.0,
                    ..Default::default()
                },
            ));
            layers.push(sentry_tracing::layer().boxed());
            Some(guard)
        }
        _ => None,
    };

    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref(), &config.default_filter)?;

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::debug!(
        json = config.json,
        file = config.log_dir.is_some(),
        sentry = sentry_guard.is_some(),
        "tracing initialized"
    );

    Ok(LogGuard {
        _file: file_guard,
        _sentry: sentry_guard,
    })
}
