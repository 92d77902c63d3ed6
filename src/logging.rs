//! Logging infrastructure - structured tracing across the dispatch layer
//!
//! Design: `tracing` events with structured fields at every boundary
//! (resolution, library loads, calls, callback wrapping, load/unload).
//! - Configurable level, overridable through `RUST_LOG`
//! - Optional daily rolling log file
//! - Human-readable or JSON output

use once_cell::sync::OnceCell;
use std::io;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::errors::DispatchError;

pub const LOG_LEVEL_ENV: &str = "OIF_LOG_LEVEL";
pub const LOG_FILE_ENV: &str = "OIF_LOG_FILE";
pub const LOG_JSON_ENV: &str = "OIF_LOG_JSON";
pub const LOG_SPANS_ENV: &str = "OIF_LOG_SPANS";

/// Set once; holds the file writer's guard so buffered lines are flushed at exit
static LOGGER: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; logs go to stderr when unset
    pub log_path: Option<PathBuf>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.to_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // OIF_LOG_LEVEL: trace, debug, info, warn, error
        if let Some(level) = lookup(LOG_LEVEL_ENV).as_deref().and_then(parse_level) {
            config.level = level;
        }

        config.log_path = lookup(LOG_FILE_ENV).filter(|p| !p.is_empty()).map(PathBuf::from);
        config.json_format = lookup(LOG_JSON_ENV).map_or(false, |v| is_truthy(&v));
        config.show_spans = lookup(LOG_SPANS_ENV).map_or(false, |v| is_truthy(&v));
        config
    }

    /// Verbose console logging for debugging a host process
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            show_spans: true,
            ..Self::default()
        }
    }
}

/// Initialize logging from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration; later calls are no-ops.
pub fn init_with_config(config: LogConfig) {
    LOGGER.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("oif_dispatch={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (writer, guard) = match &config.log_path {
            Some(path) => {
                let (dir, prefix) = split_log_path(path);
                let appender = tracing_appender::rolling::daily(dir, prefix);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer), Some(guard))
            }
            None => (tracing_subscriber::fmt::writer::BoxMakeWriter::new(io::stderr), None),
        };

        let layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_span_events(span_events)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(writer)
                .with_span_events(span_events)
                .with_ansi(config.log_path.is_none())
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .boxed()
        };

        // A host may have installed its own subscriber already; keep it.
        let _ = tracing_subscriber::registry().with(layer).with(env_filter).try_init();
        guard
    });
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("oif_dispatch.log"));
    (dir, prefix)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER.get().is_some()
}

/// Log a failure reported across the C ABI
pub fn log_call_failure(entry_point: &str, err: &DispatchError) {
    tracing::error!(
        event = "call_failed",
        entry_point,
        category = ?err.category(),
        status = err.status_code(),
        "{}",
        err
    );
}

/// Log a panic caught at the C ABI
pub fn log_panic(entry_point: &str, message: &str) {
    tracing::error!(
        event = "panic",
        entry_point,
        message,
        "panic caught at the C boundary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> LogConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, LogConfig::default());
        assert_eq!(config.level, Level::WARN);
        assert!(config.log_path.is_none());
    }

    #[test]
    fn test_config_from_variables() {
        let config = config_from(&[
            (LOG_LEVEL_ENV, "Debug"),
            (LOG_FILE_ENV, "/var/log/oif/dispatch.log"),
            (LOG_JSON_ENV, "1"),
            (LOG_SPANS_ENV, "false"),
        ]);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.log_path, Some(PathBuf::from("/var/log/oif/dispatch.log")));
        assert!(config.json_format);
        assert!(!config.show_spans);
    }

    #[test]
    fn test_unknown_level_keeps_default() {
        assert_eq!(config_from(&[(LOG_LEVEL_ENV, "loud")]).level, Level::WARN);
    }

    #[test]
    fn test_split_log_path() {
        assert_eq!(
            split_log_path(Path::new("/tmp/oif/dispatch.log")),
            (PathBuf::from("/tmp/oif"), PathBuf::from("dispatch.log"))
        );
        assert_eq!(
            split_log_path(Path::new("dispatch.log")),
            (PathBuf::from("."), PathBuf::from("dispatch.log"))
        );
    }

    #[test]
    fn test_init_idempotent() {
        init();
        init(); // Should not panic
        assert!(is_initialized());
    }
}
