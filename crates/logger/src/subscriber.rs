use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{LogConfig, LogFormat, LogSink, LoggerError};

/// Install the global subscriber described by `config`.
pub fn init(config: &LogConfig) -> Result<(), LoggerError> {
    let env_filter =
        EnvFilter::builder().with_default_directive(config.level.into()).from_env_lossy();

    let writer = make_writer(&config.sink)?;
    let log_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(matches!(config.sink, LogSink::Stderr | LogSink::Stdout))
            .with_writer(writer)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(log_layer)
        .try_init()
        .map_err(|_| LoggerError::AlreadyInitialized)
}

fn make_writer(sink: &LogSink) -> Result<BoxMakeWriter, LoggerError> {
    Ok(match sink {
        LogSink::Stderr => BoxMakeWriter::new(io::stderr),
        LogSink::Stdout => BoxMakeWriter::new(io::stdout),
        LogSink::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggerError::OpenSink { path: path.clone(), source })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    })
}
