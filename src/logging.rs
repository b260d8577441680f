//! Process-wide logging setup.
//!
//! [`init_logging`] installs one `tracing` subscriber with a console layer on
//! stderr and, optionally, a plain-text file layer. It is called once from
//! `main`; the returned [`LoggingGuard`] flushes the log file when dropped.
//!
//! ## Why a `Mutex<File>`?
//!
//! Calls run concurrently and all of them log. Each formatted event reaches
//! [`LogSink`] as a single write under one lock, so lines from different calls
//! never interleave inside the file.

use crate::error::ServiceError;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Level used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging options, usually filled from CLI flags.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive (`info`, `debug`, `fileproc=trace`, …). `RUST_LOG` wins.
    pub level: String,
    /// Also append plain-text logs to this file.
    pub log_file: Option<PathBuf>,
    /// Colour the console output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            log_file: None,
            ansi: true,
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
/// [`ServiceError::Io`] if the log file cannot be opened,
/// [`ServiceError::InvalidConfig`] if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, ServiceError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi)
        .with_target(false);

    let sink = config.log_file.as_deref().map(LogSink::open).transpose()?;
    let file_layer = sink
        .clone()
        .map(|sink| fmt::layer().with_writer(sink).with_ansi(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| ServiceError::InvalidConfig(format!("logging already initialised: {e}")))?;

    Ok(LoggingGuard { sink })
}

/// Keeps the log file alive; syncs it to disk on drop.
#[must_use]
#[derive(Debug)]
pub struct LoggingGuard {
    sink: Option<LogSink>,
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        if let Some(sink) = &self.sink {
            let _ = sink.sync();
        }
    }
}

/// Append-only log file shared by every thread.
#[derive(Debug, Clone)]
pub struct LogSink {
    file: Arc<Mutex<File>>,
}

impl LogSink {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn open(path: &Path) -> Result<Self, ServiceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::io(format!("Failed to create log directory {}", parent.display()), e)
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ServiceError::io(format!("Failed to open log file {}", path.display()), e))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Flush buffered data and fsync.
    pub fn sync(&self) -> io::Result<()> {
        let mut file = lock(&self.file);
        file.flush()?;
        file.sync_all()
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSinkWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogSinkWriter { file: &self.file }
    }
}

/// Writer handed to the fmt layer for one event.
pub struct LogSinkWriter<'a> {
    file: &'a Mutex<File>,
}

impl Write for LogSinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(self.file).write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(self.file).flush()
    }
}

/// A panic while holding the lock must not silence logging for everyone else.
fn lock(file: &Mutex<File>) -> MutexGuard<'_, File> {
    file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
