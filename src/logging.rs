//! Tracing subscriber setup.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Env var that overrides the configured filter, e.g. `storysync=debug`.
pub const LOG_ENV: &str = "STORYSYNC_LOG";

const LOG_FILE_PREFIX: &str = "storysync.log";

/// Filter from `STORYSYNC_LOG`, falling back to the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
  match std::env::var(LOG_ENV) {
    Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
      .map_err(|e| eyre!("Invalid {} filter '{}': {}", LOG_ENV, directives, e)),
    _ => EnvFilter::try_new(&config.level)
      .map_err(|e| eyre!("Invalid log level '{}': {}", config.level, e)),
  }
}

/// Install the global subscriber. Logs go to stderr, and additionally to a
/// daily-rolling file when a directory is configured.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// life of the process.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = env_filter(config)?;
  let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

  match &config.directory {
    Some(directory) => {
      std::fs::create_dir_all(directory)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;
      let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;
      Ok(None)
    }
  }
}
