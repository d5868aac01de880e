//! Tracing subscriber setup.

use crate::options::LoggingOptions;
use corral_shared::errors::{CorralError, CorralResult};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_PREFIX: &str = "corral.log";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. With a log directory, output is
/// written to a daily-rotated file by a background worker; keep the returned
/// guard alive or buffered lines are lost. Without one, logs go to stderr and
/// no guard is returned.
///
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_logging(options: &LoggingOptions) -> CorralResult<Option<WorkerGuard>> {
    let env_filter = build_filter(&options.level)?;

    match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            register_file_writer(non_blocking, env_filter);
            Ok(Some(guard))
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
                .try_init();
            Ok(None)
        }
    }
}

fn build_filter(level: &str) -> CorralResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| CorralError::Config(format!("invalid log level '{}': {}", level, e)))
}

fn register_file_writer(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}
