//! Logging setup for embedders and tests
//!
//! The allocator itself only emits `tracing` events; nothing is printed
//! unless a subscriber is installed. This module installs one.
//!
//! Chunk creation/destruction is logged at `debug`, individual
//! allocate/deallocate/swap/reserve calls at `trace`, provider exhaustion at
//! `warn` and handle misuse at `error`.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard filter, takes precedence (e.g. "chunkalloc=trace")
//! - `CHUNKALLOC_LOG_LEVEL`: error, warn, info, debug, trace
//! - `CHUNKALLOC_LOG_FORMAT`: "human" or "json"
//! - `CHUNKALLOC_LOG_FILE`: also append JSON records to this file

use once_cell::sync::OnceCell;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_LEVEL_ENV: &str = "CHUNKALLOC_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "CHUNKALLOC_LOG_FORMAT";
const LOG_FILE_ENV: &str = "CHUNKALLOC_LOG_FILE";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("failed to create log directory: {0}")]
    DirectoryCreationFailed(String),

    #[error("failed to open log file: {0}")]
    FileOpenFailed(String),

    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse from string, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "console" => Some(LogFormat::Human),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include file/line in console records
    pub with_file_info: bool,
    /// Emit a record when a span closes (useful to time compaction runs)
    pub with_span_events: bool,
    /// Optional JSON log file, written in addition to the console
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    pub fn with_span_events(mut self, with_span_events: bool) -> Self {
        self.with_span_events = with_span_events;
        self
    }

    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    /// Build a configuration from the `CHUNKALLOC_LOG_*` variables.
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = LoggingConfig::new();
        if let Some(level) = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|s| LogLevel::parse(&s))
        {
            config.level = level;
        }
        if let Some(format) = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| LogFormat::parse(&s))
        {
            config.format = format;
        }
        if let Ok(file) = std::env::var(LOG_FILE_ENV) {
            config.log_file = Some(PathBuf::from(file));
        }
        config
    }
}

/// Initialize logging from the environment, ignoring failures.
///
/// Idempotent: only the first call installs a subscriber.
pub fn init_logging_default() {
    init_with_config(&LoggingConfig::from_env());
}

/// Initialize logging from the environment, reporting failures.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    try_init_with_config(&LoggingConfig::from_env())
}

/// Initialize logging with a custom configuration, ignoring failures.
pub fn init_with_config(config: &LoggingConfig) {
    if let Err(err) = try_init_with_config(config) {
        eprintln!("chunkalloc: logging not initialized: {}", err);
    }
}

/// Initialize logging with a custom configuration.
///
/// Returns `Ok(())` without doing anything if a previous call already
/// installed the subscriber.
pub fn try_init_with_config(config: &LoggingConfig) -> Result<(), LoggingError> {
    let mut result = Ok(());
    TRACING_INITIALIZED.get_or_init(|| {
        result = install(config);
    });
    result
}

/// Check if tracing has been initialized
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

fn install(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(config.level)?;
    let spans = span_events(config.with_span_events);

    let console: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_file(config.with_file_info)
            .with_line_number(config.with_file_info)
            .with_span_events(spans)
            .boxed(),
        LogFormat::Human => fmt::layer()
            .with_target(true)
            .with_file(config.with_file_info)
            .with_line_number(config.with_file_info)
            .with_span_events(spans)
            .boxed(),
    };

    let file_layer = match &config.log_file {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_writer(open_log_file(path)?)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_span_events(span_events(config.with_span_events)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInstalled)
}

fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| LoggingError::DirectoryCreationFailed(e.to_string()))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LoggingError::FileOpenFailed(e.to_string()))
}

/// RUST_LOG wins; otherwise the configured level applies to this crate only
/// and everything else stays at `warn`.
fn build_env_filter(level: LogLevel) -> Result<EnvFilter, LoggingError> {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(rust_log).map_err(|e| LoggingError::InvalidFilter(e.to_string()));
    }
    EnvFilter::try_new(format!("warn,chunkalloc={}", level.as_filter_str()))
        .map_err(|e| LoggingError::InvalidFilter(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" info "), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("human"), Some(LogFormat::Human));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Human));
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .with_level(LogLevel::Trace)
            .with_format(LogFormat::Json)
            .with_file_info(true)
            .with_span_events(true)
            .with_log_file(PathBuf::from("/tmp/test_chunkalloc.log"));

        assert_eq!(config.level, LogLevel::Trace);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.with_file_info);
        assert!(config.with_span_events);
        assert_eq!(
            config.log_file,
            Some(PathBuf::from("/tmp/test_chunkalloc.log"))
        );
    }

    #[test]
    fn test_default_level_is_warn() {
        assert_eq!(LoggingConfig::default().level, LogLevel::Warn);
        assert_eq!(LogLevel::Warn.as_tracing_level(), tracing::Level::WARN);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_logging_default();
        init_logging_default();
        assert!(is_initialized());
        assert!(try_init_with_config(&LoggingConfig::new()).is_ok());
    }
}
