//! Logging configuration module
//! Console output plus an optional daily-rolling JSON file

use crate::config::LoggingSettings;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_NAME: &str = "kubegate.log";

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init(settings: &LoggingSettings) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let console_layer = if settings.json_format {
        fmt::layer()
            .with_target(true)
            .with_writer(io::stdout)
            .json()
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .with_writer(io::stdout)
            .boxed()
    };

    let mut guard = None;
    let file_layer = if settings.file_logging_enabled {
        std::fs::create_dir_all(&settings.log_dir)?;
        let appender = rolling::daily(&settings.log_dir, LOG_FILE_NAME);
        let (writer, file_guard) = non_blocking(appender);
        guard = Some(file_guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(writer),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter(&settings.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        level = %settings.level,
        file = settings.file_logging_enabled,
        "Logging initialized"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_falls_back_to_level() {
        let filter = env_filter("debug");
        assert!(!filter.to_string().is_empty());
    }
}
