use anyhow::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

const LOG_FILE_PREFIX: &str = "serial-collector.log";

/// Installs the global subscriber. Headless runs log to stderr; otherwise the
/// terminal belongs to the status table and logs go to a daily file. Keep the
/// returned guard alive until exit so buffered lines are flushed.
pub fn init(config: &AppConfig, headless: bool) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE);

    if headless {
        builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(Error::msg)?;
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&config.log_directory, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    builder
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(Error::msg)?;
    Ok(Some(guard))
}
