use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/** \brief File name used inside the configured log directory. */
pub const LOG_FILE_NAME: &str = "exloapi.log";

/**
 * \brief Installs the global subscriber: human-readable stderr output plus,
 * when `log_dir` is given, JSON lines appended to `<log_dir>/exloapi.log`.
 * \details Filtering follows `RUST_LOG` and defaults to `info`. Keep the
 * returned guard alive until shutdown so buffered file lines are flushed.
 */
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;
    Ok(guard)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
