//! Logging setup for the indexer binary
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary (or to tests through `test_utils::logging`).

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_ENV: &str = "CPP_INDEXER_LOG_FILE";
pub const LOG_UNIQUE_ENV: &str = "CPP_INDEXER_LOG_UNIQUE";
pub const LOG_JSON_ENV: &str = "CPP_INDEXER_LOG_JSON";

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "cpp_indexer::jobs=trace")
    pub level: String,
    /// Optional log file path. If None, logs only to stderr
    pub file_path: Option<PathBuf>,
    /// Whether to use structured JSON format for logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create LogConfig from environment variables
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let unique = env::var(LOG_UNIQUE_ENV).unwrap_or_default() == "true";
        let file_path = env::var(LOG_FILE_ENV).ok().map(|path| {
            let path = PathBuf::from(path);
            if unique {
                unique_log_path(&path, std::process::id())
            } else {
                path
            }
        });
        let json_format = env::var(LOG_JSON_ENV).unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Override values from CLI arguments
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// Insert the process id before the extension: `indexer.log` becomes
/// `indexer.<pid>.log`
fn unique_log_path(path: &Path, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };
    let unique_name = match path.extension().and_then(|ext| ext.to_str()) {
        Some(extension) if !extension.is_empty() => {
            format!("{}.{}.{}", stem.to_string_lossy(), pid, extension)
        }
        _ => format!("{}.{}", stem.to_string_lossy(), pid),
    };
    path.with_file_name(unique_name)
}

/// Initialize the logging system based on configuration
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;
    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (&config.file_path, config.json_format) {
        (Some(file_path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            let file_layer = fmt::layer().json().with_writer(file).with_ansi(false);
            subscriber.with(file_layer).try_init()?;
        }
        (Some(file_path), false) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_line_number(true);
            subscriber.with(file_layer).try_init()?;
        }
        (None, true) => {
            let stderr_layer = fmt::layer().json().with_writer(io::stderr).with_ansi(false);
            subscriber.with(stderr_layer).try_init()?;
        }
        // Default: human readable on stderr, stdout stays free for results
        (None, false) => {
            let stderr_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(true)
                .with_target(true)
                .with_thread_names(true)
                .with_line_number(true);
            subscriber.with(stderr_layer).try_init()?;
        }
    }

    Ok(())
}

/// Log the outcome of a queued request in one line
#[macro_export]
macro_rules! log_request {
    ($level:expr, $request:expr, $outcome:expr) => {
        tracing::event!(
            $level,
            request = %$request,
            outcome = $outcome,
            "Index request finished"
        )
    };
}

/// Helper function to log performance timing
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis(),
            pid = std::process::id(),
            "Performance timing"
        )
    };
}
