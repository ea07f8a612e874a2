//! Logging setup for the tailship binary
//!
//! One subscriber serves both the daemon and the one-shot commands. Stderr
//! carries JSON lines or pretty text, and an optional rotating file carries
//! JSON lines. Stdout is never written to, since command results go there.
//!
//! ```ignore
//! use tailship_logging::{LogConfig, TailshipSubscriberBuilder};
//!
//! let _guard = TailshipSubscriberBuilder::new()
//!     .with_config(LogConfig::daemon("/var/log/tailship"))
//!     .init();
//! ```
//!
//! Keep the returned guard alive: dropping it flushes the file writer.

pub mod config;
pub mod error;

pub use config::{
    ConsoleFormat, DAEMON_RETAINED_FILES, FileConfig, FileRotation, JsonFields, LogConfig,
};
pub use error::{LoggingError, LoggingResult};

use std::fs::{self, OpenOptions};

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

/// Builds and installs the tailship subscriber
#[derive(Debug, Clone, Default)]
pub struct TailshipSubscriberBuilder {
    config: LogConfig,
}

impl TailshipSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_console(mut self, format: ConsoleFormat) -> Self {
        self.config.console = format;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the subscriber without installing it
    ///
    /// The guard is present when file output is configured.
    pub fn build(
        self,
    ) -> LoggingResult<(impl Subscriber + Send + Sync + 'static, Option<WorkerGuard>)> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.level));
        let json = self.config.json;

        let pretty_console = match self.config.console {
            ConsoleFormat::Pretty { ansi } => Some(
                fmt::layer()
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
            _ => None,
        };

        let json_console = (self.config.console == ConsoleFormat::Json).then(|| {
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(json.spans)
                .flatten_event(json.flatten)
                .with_file(json.location)
                .with_line_number(json.location)
                .with_writer(std::io::stderr)
        });

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                let layer = fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(json.spans)
                    .flatten_event(json.flatten)
                    .with_file(json.location)
                    .with_line_number(json.location)
                    .with_writer(writer);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let subscriber = Registry::default()
            .with(env_filter)
            .with(pretty_console)
            .with(json_console)
            .with(file_layer);
        Ok((subscriber, guard))
    }

    /// Install the subscriber globally
    ///
    /// Fails if a global subscriber has already been set.
    pub fn try_init(self) -> LoggingResult<Option<WorkerGuard>> {
        let (subscriber, guard) = self.build()?;
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LoggingError::Init(e.to_string()))?;
        Ok(guard)
    }

    /// Install the subscriber globally, warning on stderr on failure
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {e}");
                None
            }
        }
    }
}

/// Non-blocking writer for the configured log file
///
/// `Never` appends to `<prefix>.log`. The rotating strategies write
/// `<prefix>.<date>.log` and prune beyond `retained`.
pub fn file_writer(config: &FileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.directory)?;
    let rotation = match config.rotation {
        FileRotation::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            return Ok(tracing_appender::non_blocking(file));
        }
        FileRotation::Daily => Rotation::DAILY,
        FileRotation::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.as_str())
        .filename_suffix("log");
    if let Some(retained) = config.retained {
        builder = builder.max_log_files(retained);
    }
    let appender = builder.build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let builder = TailshipSubscriberBuilder::new()
            .with_config(LogConfig::interactive())
            .with_console(ConsoleFormat::Off)
            .with_file_output(FileConfig::new("/tmp/tailship"));
        assert_eq!(builder.config().level, "debug");
        assert_eq!(builder.config().console, ConsoleFormat::Off);
        assert!(builder.config().file.is_some());
    }

    #[test]
    fn test_pretty_console_builds_without_guard() {
        let (_subscriber, guard) = TailshipSubscriberBuilder::new()
            .with_config(LogConfig::interactive())
            .build()
            .unwrap();
        assert!(guard.is_none());
    }
}
