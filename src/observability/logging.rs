//! Structured logging.

use crate::config::{LogFormat, ObservabilityConfig};
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "RUBRICFLOW_LOG";

/// Resolved logging settings.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
    /// Filter directive.
    pub directive: String,
}

impl LoggingConfig {
    /// Resolves settings from configuration and the environment.
    ///
    /// `RUBRICFLOW_LOG` beats `RUST_LOG`, which beats the configured level.
    /// `verbose` only changes the fallback from `info` to `debug`.
    #[must_use]
    pub fn from_settings(settings: &ObservabilityConfig, verbose: bool) -> Self {
        Self::resolve(settings, verbose, |name| std::env::var(name).ok())
    }

    fn resolve<F>(settings: &ObservabilityConfig, verbose: bool, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fallback = if verbose { "debug" } else { "info" };
        let directive = lookup(LOG_ENV)
            .or_else(|| lookup("RUST_LOG"))
            .filter(|d| !d.trim().is_empty())
            .or_else(|| settings.log_level.clone())
            .unwrap_or_else(|| fallback.to_string());
        Self {
            format: settings.log_format,
            file: settings.log_file.clone(),
            directive,
        }
    }

    /// Builds the filter, falling back to `info` on an unparseable directive.
    #[must_use]
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.directive).unwrap_or_else(|e| {
            tracing::warn!(directive = %self.directive, error = %e, "invalid log filter, using info");
            EnvFilter::new("info")
        })
    }
}

/// Thread-safe file writer for logging.
#[derive(Clone)]
pub(super) struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Opens a log file for appending, creating parent directories.
pub(super) fn open_log_file(path: &Path) -> Result<LogFileWriter> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::operation("create_log_dir", e))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::operation("open_log_file", format!("{}: {e}", path.display())))?;

    Ok(LogFileWriter {
        file: Arc::new(Mutex::new(file)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_precedence() {
        let settings = ObservabilityConfig {
            log_level: Some("warn".to_string()),
            ..ObservabilityConfig::default()
        };

        let config = LoggingConfig::resolve(&settings, true, |_| None);
        assert_eq!(config.directive, "warn");

        let config = LoggingConfig::resolve(&settings, false, |name| {
            (name == "RUST_LOG").then(|| "error".to_string())
        });
        assert_eq!(config.directive, "error");

        let config = LoggingConfig::resolve(&settings, false, |name| match name {
            LOG_ENV => Some("rubricflow=trace".to_string()),
            _ => Some("error".to_string()),
        });
        assert_eq!(config.directive, "rubricflow=trace");
    }

    #[test]
    fn test_verbose_fallback() {
        let config = LoggingConfig::resolve(&ObservabilityConfig::default(), true, |_| None);
        assert_eq!(config.directive, "debug");
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("rubricflow.log");
        let mut writer = open_log_file(&path).unwrap();
        writer.write_all(b"line\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\n");
    }
}
