//! Logging setup shared by the watchpost binaries.
//!
//! The subscriber is built from an explicit [`LogConfig`] rather than from
//! ambient globals; `RUST_LOG` only refines the configured level.

mod subscriber;

use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
pub use tracing::level_filters::LevelFilter;

pub use subscriber::init;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("a global logger is already installed")]
    AlreadyInitialized,

    #[error("could not open log file {}: {source}", path.display())]
    OpenSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown log format {0:?}, expected \"compact\" or \"json\"")]
    UnknownFormat(String),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggerError::UnknownFormat(s.to_string())),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogSink {
    #[default]
    Stderr,
    Stdout,
    File(PathBuf),
}

impl FromStr for LogSink {
    type Err = Infallible;

    /// `stderr`, `stdout`, or anything else as a file path
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" | "stderr" => LogSink::Stderr,
            "stdout" => LogSink::Stdout,
            path => LogSink::File(PathBuf::from(path)),
        })
    }
}

/// Logging context handed to [`init`]
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub sink: LogSink,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: LevelFilter::INFO, format: LogFormat::default(), sink: LogSink::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!(matches!("xml".parse::<LogFormat>(), Err(LoggerError::UnknownFormat(_))));
    }

    #[test]
    fn test_parse_sink() {
        assert_eq!("stderr".parse::<LogSink>().unwrap(), LogSink::Stderr);
        assert_eq!("stdout".parse::<LogSink>().unwrap(), LogSink::Stdout);
        assert_eq!(
            "/var/log/watchpost.log".parse::<LogSink>().unwrap(),
            LogSink::File(PathBuf::from("/var/log/watchpost.log"))
        );
    }

    #[test]
    fn test_file_sink_and_double_init() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchpost.log");
        let config = LogConfig { sink: LogSink::File(path.clone()), ..LogConfig::default() };

        init(&config).unwrap();
        tracing::info!("hello from the logger test");
        assert!(path.exists());

        assert!(matches!(init(&config), Err(LoggerError::AlreadyInitialized)));
    }
}
