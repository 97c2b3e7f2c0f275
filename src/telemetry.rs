//! Tracing subscriber setup and panic logging.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use crate::config::{LogFormat, LogOutput};
use crate::middleware::recovery::panic_message;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log level '{level}': {source}")]
    InvalidLevel {
        level: String,
        #[source]
        source: ParseError,
    },

    #[error("cannot open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install tracing subscriber: {0}")]
    Install(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `level`. File output is
/// appended to and mirrored on stdout.
pub fn init_tracing(
    level: &str,
    format: LogFormat,
    output: &LogOutput,
) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|source| TelemetryError::InvalidLevel {
            level: level.to_string(),
            source,
        })?,
    };
    let writer = make_writer(output)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true);

    let installed = match format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(TelemetryError::Install)
}

fn make_writer(output: &LogOutput) -> Result<BoxMakeWriter, TelemetryError> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| TelemetryError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            BoxMakeWriter::new(std::io::stdout.and(Mutex::new(file)))
        }
    })
}

/// Log every panic with its location and a backtrace before unwinding starts.
///
/// Recovery only sees the payload once the stack is gone, so this is where
/// the stack context is captured.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let backtrace = std::backtrace::Backtrace::force_capture();

        error!(
            location = %location,
            message = %panic_message(info.payload()),
            backtrace = %backtrace,
            "Panic"
        );
    }));
}
