//! Event log offsets, reads and archival
//!
//! The event log is an ordered table whose rows are addressed by absolute
//! index. Two attributes on the table track progress:
//!
//! - `number_of_first_row`: absolute index of the first row still in the
//!   live table; everything below has been truncated (and usually archived)
//! - `row_to_save`: absolute index below which rows have been replicated
//!
//! Absolute index `i` lives at physical index `i - number_of_first_row` of
//! the live table. Rows below `number_of_first_row` that were archived sit at
//! the tail of the archive table.

use std::fmt;

use serde_json::Value;
use tailship_core::{Row, retry_with_backoff};
use tailship_table::{CreateOptions, MergeRequest, TableService, TableTransaction};
use tracing::{debug, info, instrument, warn};

use crate::config::{ArchiveConfig, NUMBER_OF_FIRST_ROW_ATTR, ROW_TO_SAVE_ATTR};
use crate::error::{EventLogError, EventLogResult};

/// Snapshot of the event log position attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offsets {
    /// Absolute index of the first live row
    pub first_row: u64,
    /// Absolute index below which rows are replicated
    pub row_to_save: u64,
    /// Rows physically present in the live table
    pub row_count: u64,
}

impl Offsets {
    /// Absolute index one past the last live row
    pub fn end_row(&self) -> u64 {
        self.first_row.saturating_add(self.row_count)
    }

    /// Replicated rows still present in the live table
    pub fn saved_live_rows(&self) -> u64 {
        self.row_to_save.saturating_sub(self.first_row)
    }

    /// Live rows waiting for replication
    pub fn lag(&self) -> u64 {
        self.row_count.saturating_sub(self.saved_live_rows())
    }

    /// `first_row <= row_to_save <= end_row`
    pub fn is_consistent(&self) -> bool {
        self.first_row <= self.row_to_save && self.row_to_save <= self.end_row()
    }
}

/// Outcome of [`EventLog::monitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReport {
    pub lag: u64,
    pub threshold: u64,
}

impl MonitorReport {
    pub fn is_lagging(&self) -> bool {
        self.lag > self.threshold
    }

    /// Monitoring status code: 2 when lagging, 0 otherwise
    pub fn status(&self) -> i32 {
        if self.is_lagging() { 2 } else { 0 }
    }
}

impl fmt::Display for MonitorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; Lag equals to: {}", self.status(), self.lag)
    }
}

/// Event log stored in an ordered table
#[derive(Debug)]
pub struct EventLog<S: TableService> {
    service: S,
    table: String,
    archive_table: String,
    config: ArchiveConfig,
}

impl<S: TableService> EventLog<S> {
    /// Event log at `table` with the default archive settings
    pub fn new(service: S, table: impl Into<String>) -> Self {
        Self::with_config(service, table, ArchiveConfig::default())
    }

    pub fn with_config(service: S, table: impl Into<String>, config: ArchiveConfig) -> Self {
        let table = table.into();
        let archive_table = config.archive_path(&table);
        Self {
            service,
            table,
            archive_table,
            config,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn archive_table(&self) -> &str {
        &self.archive_table
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    async fn require_offset(&self, tx: &S::Transaction, name: &str) -> EventLogResult<u64> {
        tx.get_u64_attribute(&self.table, name)
            .await?
            .ok_or_else(|| EventLogError::MissingOffset(name.to_string()))
    }

    async fn read_offsets(&self, tx: &S::Transaction) -> EventLogResult<Offsets> {
        Ok(Offsets {
            first_row: self.require_offset(tx, NUMBER_OF_FIRST_ROW_ATTR).await?,
            row_to_save: self.require_offset(tx, ROW_TO_SAVE_ATTR).await?,
            row_count: tx.row_count(&self.table).await?,
        })
    }

    /// Set both offset attributes to 0 where they are absent
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn initialize(&self) -> EventLogResult<()> {
        let mut tx = self.service.begin().await?;
        for name in [ROW_TO_SAVE_ATTR, NUMBER_OF_FIRST_ROW_ATTR] {
            if tx.get_attribute(&self.table, name).await?.is_none() {
                info!(attribute = name, "Initializing offset");
                tx.set_attribute(&self.table, name, Value::from(0u64))
                    .await?;
            } else {
                debug!(attribute = name, "Offset already set");
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Current offsets, read in one transaction
    pub async fn offsets(&self) -> EventLogResult<Offsets> {
        let tx = self.service.begin().await?;
        self.read_offsets(&tx).await
    }

    /// Absolute index one past the last row
    pub async fn end_row(&self) -> EventLogResult<u64> {
        Ok(self.offsets().await?.end_row())
    }

    pub async fn row_to_save(&self) -> EventLogResult<u64> {
        let tx = self.service.begin().await?;
        self.require_offset(&tx, ROW_TO_SAVE_ATTR).await
    }

    /// Advance `row_to_save`; values at or below the current one are ignored
    ///
    /// Returns the value in effect afterwards.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn set_row_to_save(&self, row: u64) -> EventLogResult<u64> {
        let mut tx = self.service.begin().await?;
        let offsets = self.read_offsets(&tx).await?;
        if row <= offsets.row_to_save {
            debug!(current = offsets.row_to_save, "row_to_save already past requested value");
            return Ok(offsets.row_to_save);
        }
        let end_row = offsets.end_row();
        if row > end_row {
            return Err(EventLogError::OffsetOutOfRange {
                offset: row,
                end_row,
            });
        }
        tx.set_attribute(&self.table, ROW_TO_SAVE_ATTR, Value::from(row))
            .await?;
        tx.commit().await?;
        debug!(row_to_save = row, "Advanced row_to_save");
        Ok(row)
    }

    /// Read `count` rows starting at absolute index `begin`
    ///
    /// Rows below `number_of_first_row` are served from the archive table.
    /// Fails with [`EventLogError::NotEnoughData`] unless exactly `count`
    /// rows are available.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn get_data(&self, begin: u64, count: u64) -> EventLogResult<Vec<Row>> {
        let tx = self.service.begin().await?;
        let first_row = self.require_offset(&tx, NUMBER_OF_FIRST_ROW_ATTR).await?;
        let mut rows = Vec::new();

        if begin < first_row {
            let missing = first_row - begin;
            let archived = if tx.exists(&self.archive_table).await? {
                tx.row_count(&self.archive_table).await?
            } else {
                0
            };
            let Some(archive_begin) = archived.checked_sub(missing) else {
                warn!(begin, first_row, archived, "Requested rows predate the archive");
                return Err(EventLogError::NotEnoughData {
                    requested: count,
                    got: 0,
                });
            };
            let take = missing.min(count);
            debug!(archive_begin, take, "Reading from archive");
            rows.extend(
                tx.read_range(&self.archive_table, archive_begin..archive_begin + take)
                    .await?,
            );
        }

        let remaining = count - rows.len() as u64;
        if remaining > 0 {
            let live_begin = begin.saturating_sub(first_row);
            rows.extend(
                tx.read_range(&self.table, live_begin..live_begin.saturating_add(remaining))
                    .await?,
            );
        }

        let got = rows.len() as u64;
        if got != count {
            return Err(EventLogError::NotEnoughData {
                requested: count,
                got,
            });
        }
        Ok(rows)
    }

    /// Drop up to `count` replicated rows from the head of the live table
    ///
    /// Never drops rows at or past `row_to_save`. Returns the number of rows
    /// dropped.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn truncate(&self, count: u64) -> EventLogResult<u64> {
        let mut tx = self.service.begin().await?;
        let offsets = self.read_offsets(&tx).await?;
        let count = count.min(offsets.saved_live_rows());
        if count == 0 {
            info!("Nothing to truncate");
            return Ok(0);
        }
        self.drop_head(&mut tx, offsets.first_row, count).await?;
        tx.commit().await?;
        info!(count, first_row = offsets.first_row + count, "Truncated event log");
        Ok(count)
    }

    /// Compare the replication lag against `threshold`
    pub async fn monitor(&self, threshold: u64) -> EventLogResult<MonitorReport> {
        let offsets = self.offsets().await?;
        let report = MonitorReport {
            lag: offsets.lag(),
            threshold,
        };
        debug!(lag = report.lag, threshold, "Event log lag");
        Ok(report)
    }

    /// Move replicated rows from the live table to the archive table
    ///
    /// `count` defaults to every live row and is clamped to the replicated
    /// ones. Runs as two steps, each in its own transaction and retried per
    /// the configured policy: an ordered merge of the head rows into the
    /// archive, then the head truncation. Returns the number of rows moved.
    #[instrument(skip(self), fields(table = %self.table, archive = %self.archive_table))]
    pub async fn archive(&self, count: Option<u64>) -> EventLogResult<u64> {
        let offsets = self.offsets().await?;
        let requested = count.unwrap_or(offsets.row_count);
        let count = requested.min(offsets.saved_live_rows());
        if count < requested {
            info!(requested, count, "Archiving only replicated rows");
        }
        if count == 0 {
            info!("Nothing to archive");
            return Ok(0);
        }

        info!(count, "Archiving event log");
        retry_with_backoff(&self.config.retry, "archive_merge", || async {
            self.merge_head(count).await.inspect_err(|e| flag_persistent("merge", e))
        })
        .await?;
        retry_with_backoff(&self.config.retry, "archive_truncate", || async {
            self.truncate_head(count).await.inspect_err(|e| flag_persistent("truncate", e))
        })
        .await?;
        info!(count, "Archived event log");
        Ok(count)
    }

    async fn merge_head(&self, count: u64) -> EventLogResult<()> {
        let mut tx = self.service.begin().await?;
        let options = CreateOptions::ignore_existing()
            .with_attribute("erasure_codec", self.config.erasure_codec.as_str())
            .with_attribute("compression_codec", self.config.compression_codec.as_str());
        tx.create_table(&self.archive_table, &options).await?;
        tx.merge_ordered(&MergeRequest {
            source: self.table.clone(),
            range: 0..count,
            destination: self.archive_table.clone(),
            compression_codec: self.config.compression_codec.clone(),
            data_size_per_job: self.config.data_size_per_job(),
            desired_chunk_size: self.config.desired_chunk_size,
        })
        .await?;
        tx.commit().await?;
        debug!(count, "Merged head into archive");
        Ok(())
    }

    async fn truncate_head(&self, count: u64) -> EventLogResult<()> {
        let mut tx = self.service.begin().await?;
        let first_row = self.require_offset(&tx, NUMBER_OF_FIRST_ROW_ATTR).await?;
        self.drop_head(&mut tx, first_row, count).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn drop_head(
        &self,
        tx: &mut S::Transaction,
        first_row: u64,
        count: u64,
    ) -> EventLogResult<()> {
        tx.erase_range(&self.table, 0..count).await?;
        tx.set_attribute(
            &self.table,
            NUMBER_OF_FIRST_ROW_ATTR,
            Value::from(first_row + count),
        )
        .await?;
        Ok(())
    }
}

fn flag_persistent(step: &str, error: &EventLogError) {
    if !error.is_transient() {
        warn!(step, error = %error, "Non-transient archive failure, retrying anyway");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tailship_table::InMemoryTableService;

    const TABLE: &str = "//logs/events";

    fn rows(range: std::ops::Range<u64>) -> Vec<Row> {
        range
            .map(|i| json!({ "n": i }).as_object().cloned().unwrap())
            .collect()
    }

    async fn setup(count: u64) -> EventLog<InMemoryTableService> {
        let service = InMemoryTableService::new();
        service.create(TABLE).await;
        service.append(TABLE, rows(0..count)).await.unwrap();
        let log = EventLog::new(service, TABLE);
        log.initialize().await.unwrap();
        log
    }

    #[test]
    fn test_offsets_arithmetic() {
        let offsets = Offsets {
            first_row: 10,
            row_to_save: 14,
            row_count: 8,
        };
        assert_eq!(offsets.end_row(), 18);
        assert_eq!(offsets.saved_live_rows(), 4);
        assert_eq!(offsets.lag(), 4);
        assert!(offsets.is_consistent());

        let behind = Offsets {
            row_to_save: 9,
            ..offsets
        };
        assert!(!behind.is_consistent());
    }

    #[test]
    fn test_monitor_report_format() {
        let ok = MonitorReport {
            lag: 5,
            threshold: 10,
        };
        assert_eq!(ok.to_string(), "0; Lag equals to: 5");
        assert_eq!(ok.status(), 0);

        let lagging = MonitorReport {
            lag: 11,
            threshold: 10,
        };
        assert_eq!(lagging.to_string(), "2; Lag equals to: 11");
        assert_eq!(lagging.status(), 2);

        let at_threshold = MonitorReport {
            lag: 10,
            threshold: 10,
        };
        assert!(!at_threshold.is_lagging());
    }

    #[tokio::test]
    async fn test_initialize_keeps_existing_offsets() {
        let log = setup(5).await;
        log.set_row_to_save(3).await.unwrap();

        log.initialize().await.unwrap();
        assert_eq!(log.row_to_save().await.unwrap(), 3);
        assert_eq!(log.offsets().await.unwrap().first_row, 0);
    }

    #[tokio::test]
    async fn test_missing_offsets() {
        let service = InMemoryTableService::new();
        service.create(TABLE).await;
        let log = EventLog::new(service, TABLE);

        assert!(matches!(
            log.row_to_save().await,
            Err(EventLogError::MissingOffset(name)) if name == ROW_TO_SAVE_ATTR
        ));
    }

    #[tokio::test]
    async fn test_set_row_to_save_is_monotonic() {
        let log = setup(5).await;

        assert_eq!(log.set_row_to_save(4).await.unwrap(), 4);
        assert_eq!(log.set_row_to_save(2).await.unwrap(), 4);
        assert_eq!(log.row_to_save().await.unwrap(), 4);
        assert!(matches!(
            log.set_row_to_save(6).await,
            Err(EventLogError::OffsetOutOfRange {
                offset: 6,
                end_row: 5
            })
        ));
    }

    #[tokio::test]
    async fn test_get_data_live() {
        let log = setup(10).await;

        assert_eq!(log.get_data(3, 4).await.unwrap(), rows(3..7));
        assert!(log.get_data(3, 0).await.unwrap().is_empty());
        assert!(matches!(
            log.get_data(8, 5).await,
            Err(EventLogError::NotEnoughData {
                requested: 5,
                got: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_truncate_clamps_to_saved_rows() {
        let log = setup(10).await;
        log.set_row_to_save(4).await.unwrap();

        assert_eq!(log.truncate(100).await.unwrap(), 4);
        let offsets = log.offsets().await.unwrap();
        assert_eq!(offsets.first_row, 4);
        assert_eq!(offsets.row_count, 6);
        assert_eq!(log.end_row().await.unwrap(), 10);
        assert_eq!(log.truncate(1).await.unwrap(), 0);

        assert_eq!(log.get_data(4, 2).await.unwrap(), rows(4..6));
        assert!(matches!(
            log.get_data(2, 2).await,
            Err(EventLogError::NotEnoughData { got: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_monitor_lag() {
        let log = setup(10).await;
        log.set_row_to_save(3).await.unwrap();

        let report = log.monitor(5).await.unwrap();
        assert_eq!(report.lag, 7);
        assert!(report.is_lagging());

        log.set_row_to_save(8).await.unwrap();
        log.truncate(2).await.unwrap();
        let report = log.monitor(5).await.unwrap();
        assert_eq!(report.lag, 2);
        assert_eq!(report.status(), 0);
    }

    #[tokio::test]
    async fn test_archive_nothing_replicated() {
        let log = setup(10).await;

        assert_eq!(log.archive(None).await.unwrap(), 0);
        assert!(!log.service().contains(log.archive_table()).await);
    }
}
