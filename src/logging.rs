//! Tracing subscriber setup for the binary
//!
//! Human-readable output goes to stderr. When a log file is configured, the
//! same events are also written there through a non-blocking appender, as
//! plain text or JSON lines.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// 0 = info, 1 = debug, 2+ = trace; ignored when `RUST_LOG` is set
    pub verbosity: u8,
    /// Write JSON lines to the log file
    pub json: bool,
    pub file: Option<PathBuf>,
}

fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn env_filter(verbosity: u8) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_level(verbosity))?),
    }
}

fn file_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender, LoggingError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|source| LoggingError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("template-versions.log"));
    Ok(tracing_appender::rolling::never(dir, file_name))
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop and must be held until exit.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = env_filter(options.verbosity)?;

    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match &options.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            let layer = if options.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case(0, "info")]
    #[case(1, "debug")]
    #[case(2, "trace")]
    #[case(9, "trace")]
    fn verbosity_raises_default_level(#[case] verbosity: u8, #[case] expected: &str) {
        assert_eq!(default_level(verbosity), expected);
    }

    #[test]
    fn file_appender_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/logs/template-versions.log");

        file_appender(&path).unwrap();

        assert!(dir.path().join("nested/logs").is_dir());
    }
}
