use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogConfig;

/// File name prefix for rolling log files.
pub const LOG_FILE_PREFIX: &str = "shard-bootstrap";

/// Build the filter: `RUST_LOG` when set, the configured directive otherwise.
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => parse_filter(&config.filter),
    }
}

/// Parse a filter directive, rejecting malformed ones instead of skipping
/// them.
pub fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive).with_context(|| format!("Invalid log filter: {directive}"))
}

/// Initializes console logging, plus a daily rolling file when
/// `config.log_dir` is set.
///
/// Returns the file writer's guard; keep it alive for the duration of the
/// process or buffered lines are lost.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config)?;

    let (file_layer, guard) = match &config.log_dir {
        Some(logs_dir) => {
            std::fs::create_dir_all(logs_dir).with_context(|| {
                format!("Failed to create log directory: {}", logs_dir.display())
            })?;

            let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Only one global subscriber can be installed per process, so these tests
    // accept the "already initialized" error and check the side effects.

    #[test]
    fn test_init_logging_creates_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let logs_dir = tmp.path().join("nested").join("logs");
        assert!(!logs_dir.exists());

        let config = LogConfig {
            filter: "warn".into(),
            log_dir: Some(logs_dir.clone()),
        };
        let result = init_logging(&config);
        assert!(logs_dir.exists());

        match result {
            Ok(guard) => assert!(guard.is_some()),
            Err(e) => {
                let msg = e.to_string();
                assert!(msg.contains("logging"), "unexpected error: {msg}");
            }
        }
    }

    #[test]
    fn test_init_logging_console_only_has_no_guard() {
        let config = LogConfig::default();
        if let Ok(guard) = init_logging(&config) {
            assert!(guard.is_none());
        }
    }

    #[test]
    fn test_unwritable_log_dir_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let config = LogConfig {
            filter: "info".into(),
            log_dir: Some(blocker.join("logs")),
        };
        let err = init_logging(&config).unwrap_err().to_string();
        assert!(err.contains("log directory"), "unexpected error: {err}");
    }

    #[test]
    fn test_parse_filter_accepts_directives() {
        for filter in ["info", "debug", "shard_network=debug,warn"] {
            assert!(parse_filter(filter).is_ok(), "{filter} rejected");
        }
    }

    #[test]
    fn test_parse_filter_rejects_bad_level() {
        let err = parse_filter("shard_network=loud").unwrap_err();
        assert!(
            format!("{err:#}").contains("Invalid log filter"),
            "unexpected error: {err:#}"
        );
    }
}
