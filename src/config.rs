//! Indexer configuration
//!
//! Provides IndexerConfig with a validating builder. The configuration is an
//! explicit value handed to the coordinator at construction time; nothing in
//! the crate reads process-wide switches.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::parser::ProblemCategories;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default per-file parse timeout (10 seconds)
pub const DEFAULT_PARSE_TIMEOUT_MS: u64 = 10_000;

/// Maximum allowed per-file parse timeout (10 minutes)
pub const MAX_PARSE_TIMEOUT_SECS: u64 = 600;

/// Default delay after the queue drains before dirty indexes are saved
pub const DEFAULT_IDLE_SAVE_DELAY_MS: u64 = 2_000;

/// Default capacity of the index event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Translation unit extensions; upper-case `C` is C++ by convention
pub const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++", "C"];

pub const DEFAULT_HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "h++", "H", "inl"];

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid timeout {timeout:?}: {reason}")]
    InvalidTimeout { timeout: Duration, reason: String },

    #[error("Index location {path} is not a directory")]
    IndexLocationNotDirectory { path: PathBuf },

    #[error("No {kind} extensions configured")]
    NoExtensions { kind: &'static str },

    #[error("Invalid extension '{extension}': {reason}")]
    InvalidExtension { extension: String, reason: String },
}

impl ConfigError {
    pub fn invalid_timeout(timeout: Duration, reason: impl Into<String>) -> Self {
        Self::InvalidTimeout {
            timeout,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Core Configuration Types
// ============================================================================

/// Complete indexer configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Directory holding per-project index files; `None` keeps indexes in memory
    pub index_location: Option<PathBuf>,

    /// Per-file parse timeout; `None` disables the watchdog
    pub parse_timeout: Option<Duration>,

    /// Problem categories reported as markers unless a project overrides them
    pub problem_markers: ProblemCategories,

    /// Idle time after which dirty indexes are saved
    pub idle_save_delay: Duration,

    /// Log every encoded key and full error chains
    pub verbose: bool,

    pub source_extensions: Vec<String>,

    pub header_extensions: Vec<String>,

    /// Capacity of the broadcast channel for index events
    pub event_capacity: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index_location: None,
            parse_timeout: Some(Duration::from_millis(DEFAULT_PARSE_TIMEOUT_MS)),
            problem_markers: ProblemCategories::ALL,
            idle_save_delay: Duration::from_millis(DEFAULT_IDLE_SAVE_DELAY_MS),
            verbose: false,
            source_extensions: DEFAULT_SOURCE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            header_extensions: DEFAULT_HEADER_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl IndexerConfig {
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::new()
    }

    fn extension(path: &Path) -> Option<&str> {
        path.extension().and_then(|ext| ext.to_str())
    }

    pub fn is_source(&self, path: &Path) -> bool {
        Self::extension(path).is_some_and(|ext| self.source_extensions.iter().any(|e| e == ext))
    }

    pub fn is_header(&self, path: &Path) -> bool {
        Self::extension(path).is_some_and(|ext| self.header_extensions.iter().any(|e| e == ext))
    }

    /// Whether a file is indexed at all
    pub fn should_index(&self, path: &Path) -> bool {
        self.is_source(path) || self.is_header(path)
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for IndexerConfig with validation and defaults
#[derive(Debug, Default)]
pub struct IndexerConfigBuilder {
    index_location: Option<PathBuf>,
    parse_timeout: Option<Option<Duration>>,
    problem_markers: Option<ProblemCategories>,
    idle_save_delay: Option<Duration>,
    verbose: Option<bool>,
    source_extensions: Option<Vec<String>>,
    header_extensions: Option<Vec<String>>,
    event_capacity: Option<usize>,
}

impl IndexerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory where index files are written; created when missing
    pub fn index_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_location = Some(path.into());
        self
    }

    /// Per-file parse timeout; zero disables the watchdog
    pub fn parse_timeout(mut self, timeout: Duration) -> Self {
        self.parse_timeout = Some((!timeout.is_zero()).then_some(timeout));
        self
    }

    pub fn no_parse_timeout(mut self) -> Self {
        self.parse_timeout = Some(None);
        self
    }

    pub fn problem_markers(mut self, categories: ProblemCategories) -> Self {
        self.problem_markers = Some(categories);
        self
    }

    pub fn idle_save_delay(mut self, delay: Duration) -> Self {
        self.idle_save_delay = Some(delay);
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = Some(enabled);
        self
    }

    pub fn source_extensions(mut self, extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.source_extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    pub fn header_extensions(mut self, extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.header_extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<IndexerConfig, ConfigError> {
        let default = IndexerConfig::default();

        let config = IndexerConfig {
            index_location: self.index_location,
            parse_timeout: self.parse_timeout.unwrap_or(default.parse_timeout),
            problem_markers: self.problem_markers.unwrap_or(default.problem_markers),
            idle_save_delay: self.idle_save_delay.unwrap_or(default.idle_save_delay),
            verbose: self.verbose.unwrap_or(default.verbose),
            source_extensions: self.source_extensions.unwrap_or(default.source_extensions),
            header_extensions: self.header_extensions.unwrap_or(default.header_extensions),
            event_capacity: self.event_capacity.unwrap_or(default.event_capacity).max(1),
        };

        Self::validate_timeouts(&config)?;
        Self::validate_extensions(&config.source_extensions, "source")?;
        Self::validate_extensions(&config.header_extensions, "header")?;
        if let Some(location) = &config.index_location {
            Self::validate_index_location(location)?;
        }

        Ok(config)
    }

    fn validate_timeouts(config: &IndexerConfig) -> Result<(), ConfigError> {
        if let Some(timeout) = config.parse_timeout
            && timeout > Duration::from_secs(MAX_PARSE_TIMEOUT_SECS)
        {
            return Err(ConfigError::invalid_timeout(
                timeout,
                "Parse timeout too long (max 10 minutes)",
            ));
        }

        if config.idle_save_delay.is_zero() {
            return Err(ConfigError::invalid_timeout(
                config.idle_save_delay,
                "Idle save delay must be greater than zero",
            ));
        }

        Ok(())
    }

    fn validate_extensions(extensions: &[String], kind: &'static str) -> Result<(), ConfigError> {
        if extensions.is_empty() {
            return Err(ConfigError::NoExtensions { kind });
        }
        for extension in extensions {
            if extension.is_empty() || extension.contains('.') || extension.contains('/') {
                return Err(ConfigError::InvalidExtension {
                    extension: extension.clone(),
                    reason: "expected a bare extension such as 'cpp'".to_string(),
                });
            }
        }
        Ok(())
    }

    /// The location may not exist yet, but must not be a file
    fn validate_index_location(path: &Path) -> Result<(), ConfigError> {
        if path.exists() && !path.is_dir() {
            return Err(ConfigError::IndexLocationNotDirectory {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}
