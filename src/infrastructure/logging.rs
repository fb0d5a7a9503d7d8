//! Structured logging bootstrap.
//!
//! `RUST_LOG`, when set, takes precedence for the process's own diagnostic
//! verbosity; otherwise the resolved `log_level` setting is used. File
//! output is split into an operational stream and an error-and-above
//! stream per the on-disk layout (`app/logs/logs/*.log`,
//! `app/logs/error/*.log`). A worker subprocess logs to console only and
//! never touches the rotated files owned by the parent controller.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Resolved logging parameters, derived from the `Settings` row (or
/// compiled defaults) at controller construction time.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub to_file: bool,
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            to_file: true,
            log_dir: PathBuf::from("app/logs"),
        }
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global `tracing` subscriber for the controller process.
/// Must be called at most once; a second call returns an error rather
/// than panicking, so callers that might double-initialize (tests) can
/// ignore the failure.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(&config.level);
    let registry = Registry::default().with(env_filter);

    if !config.to_file {
        registry
            .with(
                fmt::Layer::new()
                    .with_writer(std::io::stdout)
                    .with_target(false),
            )
            .try_init()
            .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;
        info!("logging initialized, console only");
        return Ok(());
    }

    let ops_dir = config.log_dir.join("logs");
    let error_dir = config.log_dir.join("error");
    std::fs::create_dir_all(&ops_dir)
        .map_err(|e| anyhow!("failed to create log directory {ops_dir:?}: {e}"))?;
    std::fs::create_dir_all(&error_dir)
        .map_err(|e| anyhow!("failed to create log directory {error_dir:?}: {e}"))?;

    let ops_appender = rolling::daily(&ops_dir, "fleet-controller.log");
    let (ops_writer, ops_guard) = non_blocking(ops_appender);
    std::mem::forget(ops_guard);

    let error_appender = rolling::daily(&error_dir, "fleet-controller-error.log");
    let (error_writer, error_guard) = non_blocking(error_appender);
    std::mem::forget(error_guard);

    if config.json {
        let ops_layer = fmt::Layer::new()
            .json()
            .with_writer(ops_writer)
            .with_target(true)
            .with_thread_ids(true);
        let error_layer = fmt::Layer::new()
            .json()
            .with_writer(error_writer)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);
        registry
            .with(ops_layer)
            .with(error_layer)
            .with(
                fmt::Layer::new()
                    .with_writer(std::io::stdout)
                    .with_target(false),
            )
            .try_init()
    } else {
        let ops_layer = fmt::Layer::new()
            .with_writer(ops_writer)
            .with_target(true)
            .with_thread_ids(true);
        let error_layer = fmt::Layer::new()
            .with_writer(error_writer)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);
        registry
            .with(ops_layer)
            .with(error_layer)
            .with(
                fmt::Layer::new()
                    .with_writer(std::io::stdout)
                    .with_target(false),
            )
            .try_init()
    }
    .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;

    info!(log_dir = ?config.log_dir, json = config.json, "logging initialized");
    Ok(())
}

/// Console-only logging for the worker subprocess; never writes to the
/// controller's rotated files.
pub fn init_worker_logging(level: &str) -> Result<()> {
    let env_filter = build_env_filter(level);
    Registry::default()
        .with(env_filter)
        .with(fmt::Layer::new().with_writer(std::io::stdout))
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

/// Resolve the log directory relative to a repo root, matching §6's
/// on-disk layout (`<repo_root>/app/logs`).
#[must_use]
pub fn log_directory(repo_root: &Path) -> PathBuf {
    repo_root.join("app").join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_directory_is_under_app() {
        let dir = log_directory(Path::new("/repo"));
        assert_eq!(dir, PathBuf::from("/repo/app/logs"));
    }

    #[test]
    fn default_config_writes_files_and_console() {
        let config = LoggingConfig::default();
        assert!(config.to_file);
        assert!(!config.json);
    }
}
