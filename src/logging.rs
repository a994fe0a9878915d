//! Logging setup with optional file rotation
//!
//! `RUST_LOG` overrides the configured level when set.

use crate::error::{CoordinatorError, Result};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, EnvFilter, Layer};

const DEFAULT_LOG_FILE: &str = "ventilation-coordinator.log";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level
    pub level: Level,

    /// Log to file; rotated daily
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON lines instead of human readable text
    pub json: bool,

    /// Include thread IDs
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            json: false,
            thread_ids: false,
        }
    }
}

/// Initialize logging with the given configuration
///
/// Fails if a global subscriber has already been installed.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy();

    let stderr_layer = config.stderr.then(|| {
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(config.thread_ids);
        if config.json {
            layer.json().boxed()
        } else {
            layer.with_ansi(true).boxed()
        }
    });

    let file_layer = match &config.file_path {
        Some(file_path) => {
            let (directory, file_name) = split_log_path(file_path);
            std::fs::create_dir_all(directory).map_err(|e| {
                CoordinatorError::configuration(format!(
                    "Cannot create log directory {}: {}",
                    directory.display(),
                    e
                ))
            })?;

            let file_appender = tracing_appender::rolling::daily(directory, file_name);
            let layer = fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_thread_ids(config.thread_ids);
            Some(if config.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            })
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        CoordinatorError::configuration(format!("Logging already initialized: {e}"))
    })
}

fn split_log_path(path: &Path) -> (&Path, &std::ffi::OsStr) {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new(DEFAULT_LOG_FILE));
    (directory, file_name)
}
