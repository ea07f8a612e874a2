//! # Tailship EventLog
//!
//! Position bookkeeping and archival for an event log kept in an ordered
//! table.
//!
//! The log is append-only from the producer's side. Tailship reads rows by
//! absolute index, records how far replication got in `row_to_save`, and
//! periodically moves replicated rows out of the live table into an archive
//! table so the live table stays small.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tailship_eventlog::EventLog;
//! use tailship_table::InMemoryTableService;
//!
//! let log = EventLog::new(InMemoryTableService::new(), "//sys/scheduler/event_log");
//! log.initialize().await?;
//!
//! let rows = log.get_data(0, 100).await?;
//! log.set_row_to_save(100).await?;
//! log.archive(None).await?;
//! ```

pub mod config;
pub mod error;
pub mod event_log;

pub use config::{ArchiveConfig, NUMBER_OF_FIRST_ROW_ATTR, ROW_TO_SAVE_ATTR};
pub use error::{EventLogError, EventLogResult};
pub use event_log::{EventLog, MonitorReport, Offsets};
