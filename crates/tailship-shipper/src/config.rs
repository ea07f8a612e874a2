//! Shipper settings and command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tailship_logging::LogConfig;
use tailship_transport::{DEFAULT_ADVISER_URL, DEFAULT_SERVICE_ID, DEFAULT_SOURCE_ID, SessionParams};

use crate::error::{ShipperError, ShipperResult};

/// Scheduler event log shipped by default
pub const DEFAULT_TABLE: &str = "//sys/scheduler/event_log";
pub const DEFAULT_CHUNK_SIZE: usize = 4000;
pub const DEFAULT_ACK_QUEUE_LENGTH: usize = 1;
pub const DEFAULT_TRUNCATE_COUNT: u64 = 1_000_000;
pub const DEFAULT_LAG_THRESHOLD: u64 = 1_000_000;

/// Live-tailing settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipperConfig {
    /// Rows per chunk
    pub chunk_size: usize,
    /// Chunks awaiting acknowledgement before the shipper blocks
    pub ack_queue_length: usize,
    /// Value of the `cluster_name` field on shipped rows
    pub cluster_name: String,
    /// Value of the `tskv_format` field on shipped rows
    pub log_name: String,
    /// Drop the `error` field from shipped rows
    pub strip_error: bool,
    /// Wait between polls when the log has no new rows (milliseconds)
    pub poll_interval_ms: u64,
    /// Wait before opening a new session after a failure (milliseconds)
    pub reconnect_delay_ms: u64,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_queue_length: DEFAULT_ACK_QUEUE_LENGTH,
            cluster_name: String::new(),
            log_name: String::new(),
            strip_error: false,
            poll_interval_ms: 1000,
            reconnect_delay_ms: 60_000,
        }
    }
}

impl ShipperConfig {
    pub fn with_chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = rows.max(1);
        self
    }

    pub fn with_ack_queue_length(mut self, chunks: usize) -> Self {
        self.ack_queue_length = chunks.max(1);
        self
    }

    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    pub fn with_log_name(mut self, name: impl Into<String>) -> Self {
        self.log_name = name.into();
        self
    }

    pub fn with_strip_error(mut self, strip: bool) -> Self {
        self.strip_error = strip;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Parser)]
#[command(name = "tailship", about = "Ships an event log table to LogBroker")]
pub struct Cli {
    /// Path to the event log table
    #[arg(long, global = true, default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Write JSONL logs to this directory instead of stderr
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Operate on an empty in-memory table instead of a table service
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Logging setup implied by `--log-dir` and `--verbose`
    pub fn log_config(&self) -> LogConfig {
        match (&self.log_dir, self.verbose) {
            (Some(dir), false) => LogConfig::daemon(dir),
            (Some(dir), true) => LogConfig::daemon(dir).with_level("debug"),
            (None, true) => LogConfig::interactive(),
            (None, false) => LogConfig::default(),
        }
    }

    /// Standalone runs have no table service; refuse unless `--dry-run` asks
    /// for the in-memory one
    pub fn ensure_dry_run(&self) -> ShipperResult<()> {
        if self.dry_run || matches!(self.command, Command::Version) {
            return Ok(());
        }
        Err(ShipperError::NoTableService(self.table.clone()))
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Ship new rows to LogBroker until interrupted
    Run(RunArgs),
    /// Set missing offset attributes to 0
    Init,
    /// Drop replicated rows from the head of the table
    Truncate {
        /// Maximum number of rows to drop
        #[arg(long, default_value_t = DEFAULT_TRUNCATE_COUNT)]
        count: u64,
    },
    /// Print the replication lag; exits with 2 when it exceeds the threshold
    Monitor {
        #[arg(long, default_value_t = DEFAULT_LAG_THRESHOLD)]
        threshold: u64,
    },
    /// Move replicated rows into the archive table
    Archive {
        /// Maximum number of rows to move (default: all replicated rows)
        #[arg(long)]
        count: Option<u64>,
    },
    /// Print the version
    Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct RunArgs {
    /// Rows per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Chunks in flight before waiting for acknowledgements
    #[arg(long, default_value_t = DEFAULT_ACK_QUEUE_LENGTH)]
    pub ack_queue_length: usize,

    /// Name of the source cluster
    #[arg(long, default_value = "")]
    pub cluster_name: String,

    /// LogBroker log type, also stamped as `tskv_format`
    #[arg(long, default_value = "")]
    pub logtype: String,

    #[arg(long, default_value = DEFAULT_SERVICE_ID)]
    pub service_id: String,

    #[arg(long, default_value = DEFAULT_SOURCE_ID)]
    pub source_id: String,

    /// Adviser handing out LogBroker hosts
    #[arg(long, default_value = DEFAULT_ADVISER_URL)]
    pub adviser_url: String,

    /// Connect to this host instead of asking the adviser
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Drop the `error` field from shipped rows
    #[arg(long)]
    pub strip_error: bool,
}

impl RunArgs {
    pub fn shipper_config(&self) -> ShipperConfig {
        ShipperConfig::default()
            .with_chunk_size(self.chunk_size)
            .with_ack_queue_length(self.ack_queue_length)
            .with_cluster_name(&self.cluster_name)
            .with_log_name(&self.logtype)
            .with_strip_error(self.strip_error)
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams::new(&self.service_id, &self.source_id, &self.logtype)
    }
}
