//! Where log output goes and how it is formatted

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Rotated files kept by a daemon
pub const DAEMON_RETAINED_FILES: usize = 30;

/// Logging setup for one process
///
/// `RUST_LOG`, when set, takes precedence over `level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub console: ConsoleFormat,
    pub file: Option<FileConfig>,
    pub json: JsonFields,
}

impl Default for LogConfig {
    /// JSON lines on stderr at `info`
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleFormat::Json,
            file: None,
            json: JsonFields::default(),
        }
    }
}

impl LogConfig {
    /// Colored human-readable stderr output at `debug`, for a terminal
    pub fn interactive() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleFormat::Pretty { ansi: true },
            ..Self::default()
        }
    }

    /// Daily-rotated JSON files under `directory` and nothing on stderr
    pub fn daemon(directory: impl Into<PathBuf>) -> Self {
        Self {
            console: ConsoleFormat::Off,
            file: Some(FileConfig::new(directory).with_retained(DAEMON_RETAINED_FILES)),
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// Format of stderr output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleFormat {
    Off,
    Json,
    Pretty { ansi: bool },
}

/// Log file location and rotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File names start with this, e.g. `tailship.2014-05-12.log`
    pub prefix: String,
    pub rotation: FileRotation,
    /// Rotated files to keep; `None` keeps all of them
    pub retained: Option<usize>,
}

impl FileConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "tailship".to_string(),
            rotation: FileRotation::Daily,
            retained: Some(7),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_rotation(mut self, rotation: FileRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_retained(mut self, files: usize) -> Self {
        self.retained = Some(files);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    /// One file, appended to across runs
    Never,
}

/// Fields included in JSON lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFields {
    /// Put event fields at the top level instead of under `fields`
    pub flatten: bool,
    pub spans: bool,
    /// Source file and line
    pub location: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            flatten: true,
            spans: true,
            location: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_json_on_stderr() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.console, ConsoleFormat::Json);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_interactive() {
        let config = LogConfig::interactive();
        assert_eq!(config.level, "debug");
        assert_eq!(config.console, ConsoleFormat::Pretty { ansi: true });
    }

    #[test]
    fn test_daemon_writes_files_only() {
        let config = LogConfig::daemon("/var/log/tailship").with_level("warn");
        assert_eq!(config.console, ConsoleFormat::Off);
        assert_eq!(config.level, "warn");
        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/tailship"));
        assert_eq!(file.rotation, FileRotation::Daily);
        assert_eq!(file.retained, Some(DAEMON_RETAINED_FILES));
    }

    #[test]
    fn test_file_config_builder() {
        let file = FileConfig::new("/tmp/logs")
            .with_prefix("shipper")
            .with_rotation(FileRotation::Never);
        assert_eq!(file.prefix, "shipper");
        assert_eq!(file.rotation, FileRotation::Never);
        assert_eq!(file.retained, Some(7));
    }
}
