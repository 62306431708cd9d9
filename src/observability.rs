//! Logging and observability helpers.

use std::fs;
use std::path::PathBuf;

use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::config::data_dir;

const LOG_FILE_PREFIX: &str = "mergen.log";
const DEFAULT_FILTER: &str = "mergen=info";

/// Installs a daily-rolling file subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init_tracing() {
    let log_dir = log_directory();
    let _ = fs::create_dir_all(&log_dir);

    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(file_appender)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// `~/.mergen/logs`, or `%APPDATA%\Mergen\logs` on Windows
pub fn log_directory() -> PathBuf {
    let mut path = data_dir();
    path.push("logs");
    path
}
