//! Logging setup for the `deskline` binary
//!
//! Console output goes to stderr so command output on stdout stays
//! machine-readable. An optional JSON file layer rolls daily.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const DEFAULT_FILTER: &str = "warn,deskline=info,deskline_connection=info,deskline_core=info,deskline_drivers=info";
const VERBOSE_FILTER: &str =
    "info,deskline=debug,deskline_connection=debug,deskline_core=debug,deskline_drivers=debug";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for JSON log files
    pub log_dir: PathBuf,

    /// Write JSON logs to a daily rolling file
    pub enable_json_logs: bool,

    /// Include file/line information in console logs
    pub include_location: bool,

    /// Log span open/close (for timing pool and driver calls)
    pub enable_spans: bool,

    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl LoggingConfig {
    pub fn new(verbose: bool) -> Self {
        Self {
            log_dir: log_directory(),
            enable_json_logs: false,
            include_location: verbose,
            enable_spans: verbose,
            default_filter: if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER }.to_string(),
        }
    }

    pub fn with_json_logs(mut self, log_dir: Option<PathBuf>) -> Self {
        self.enable_json_logs = true;
        if let Some(dir) = log_dir {
            self.log_dir = dir;
        }
        self
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit; dropping it flushes and stops
/// the file writer.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // RUST_LOG takes precedence over the default filter
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(span_events.clone())
        .with_ansi(true)
        .pretty()
        .with_filter(env_filter.clone())
        .boxed();
    layers.push(console_layer);

    let mut guard = None;
    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;
        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "deskline.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        "logging initialized"
    );
    Ok(guard)
}

/// `<local data dir>/deskline/logs`
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("deskline")
        .join("logs")
}
