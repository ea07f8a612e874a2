//! In-memory table service
//!
//! Keeps every table in a map guarded by an async mutex. A transaction holds
//! the lock for its whole lifetime and works on a private copy that replaces
//! the shared state on commit, so transactions are serializable and an
//! aborted transaction leaves no trace.
//!
//! [`FaultInjector`] makes commits, erasing commits or merges fail on
//! demand, which is how tests exercise the retry paths of the archiver.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tailship_core::Row;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};

use crate::error::{TableError, TableResult};
use crate::{CreateOptions, MergeRequest, TableService, TableTransaction};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    attributes: Map<String, Value>,
}

type Tables = HashMap<String, Table>;

/// Injects failures into an [`InMemoryTableService`]
#[derive(Debug, Default)]
pub struct FaultInjector {
    failing_commits: AtomicU32,
    failing_erase_commits: AtomicU32,
    failing_merges: AtomicU32,
}

impl FaultInjector {
    /// Make the next `n` commits fail with a transient error
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits of transactions that erased rows fail
    pub fn fail_next_erase_commits(&self, n: u32) {
        self.failing_erase_commits.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` merge jobs fail with a transient error
    pub fn fail_next_merges(&self, n: u32) {
        self.failing_merges.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-memory implementation of [`TableService`]
///
/// Cloning yields another handle to the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTableService {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryTableService {
    /// Create an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the fault injector
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Create an empty table if it does not exist yet
    pub async fn create(&self, path: &str) {
        self.tables
            .lock()
            .await
            .entry(path.to_string())
            .or_default();
    }

    /// Append rows outside of any transaction, as a producer would
    pub async fn append(&self, path: &str, rows: Vec<Row>) -> TableResult<()> {
        let mut tables = self.tables.lock().await;
        let table = tables
            .get_mut(path)
            .ok_or_else(|| TableError::not_found(path))?;
        trace!(path, count = rows.len(), "Appending rows");
        table.rows.extend(rows);
        Ok(())
    }

    /// Snapshot of all rows in a table
    pub async fn rows(&self, path: &str) -> TableResult<Vec<Row>> {
        let tables = self.tables.lock().await;
        tables
            .get(path)
            .map(|t| t.rows.clone())
            .ok_or_else(|| TableError::not_found(path))
    }

    /// Number of rows physically present in a table
    pub async fn row_count(&self, path: &str) -> TableResult<u64> {
        let tables = self.tables.lock().await;
        tables
            .get(path)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| TableError::not_found(path))
    }

    /// Current value of a table attribute
    pub async fn attribute(&self, path: &str, name: &str) -> Option<Value> {
        let tables = self.tables.lock().await;
        tables.get(path)?.attributes.get(name).cloned()
    }

    /// Whether a table exists
    pub async fn contains(&self, path: &str) -> bool {
        self.tables.lock().await.contains_key(path)
    }
}

#[async_trait]
impl TableService for InMemoryTableService {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> TableResult<InMemoryTransaction> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTransaction {
            guard: Some(guard),
            working,
            erased: false,
            faults: Arc::clone(&self.faults),
        })
    }
}

/// Transaction over an [`InMemoryTableService`]
#[derive(Debug)]
pub struct InMemoryTransaction {
    guard: Option<OwnedMutexGuard<Tables>>,
    working: Tables,
    erased: bool,
    faults: Arc<FaultInjector>,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> TableResult<()> {
        if self.guard.is_none() {
            return Err(TableError::TransactionFinished);
        }
        Ok(())
    }

    fn table(&self, path: &str) -> TableResult<&Table> {
        self.ensure_open()?;
        self.working
            .get(path)
            .ok_or_else(|| TableError::not_found(path))
    }

    fn table_mut(&mut self, path: &str) -> TableResult<&mut Table> {
        self.ensure_open()?;
        self.working
            .get_mut(path)
            .ok_or_else(|| TableError::not_found(path))
    }
}

fn check_bounds(path: &str, range: &Range<u64>, len: usize) -> TableResult<Range<usize>> {
    if range.start > range.end || range.end > len as u64 {
        return Err(TableError::invalid_range(path, range));
    }
    Ok(range.start as usize..range.end as usize)
}

#[async_trait]
impl TableTransaction for InMemoryTransaction {
    async fn exists(&self, path: &str) -> TableResult<bool> {
        self.ensure_open()?;
        Ok(self.working.contains_key(path))
    }

    async fn row_count(&self, path: &str) -> TableResult<u64> {
        Ok(self.table(path)?.rows.len() as u64)
    }

    async fn get_attribute(&self, path: &str, name: &str) -> TableResult<Option<Value>> {
        Ok(self.table(path)?.attributes.get(name).cloned())
    }

    async fn set_attribute(&mut self, path: &str, name: &str, value: Value) -> TableResult<()> {
        trace!(path, name, %value, "Setting attribute");
        self.table_mut(path)?
            .attributes
            .insert(name.to_string(), value);
        Ok(())
    }

    async fn create_table(&mut self, path: &str, options: &CreateOptions) -> TableResult<()> {
        self.ensure_open()?;
        if self.working.contains_key(path) {
            if options.ignore_existing {
                return Ok(());
            }
            return Err(TableError::AlreadyExists(path.to_string()));
        }
        debug!(path, "Creating table");
        self.working.insert(
            path.to_string(),
            Table {
                rows: Vec::new(),
                attributes: options.attributes.clone(),
            },
        );
        Ok(())
    }

    async fn read_range(&self, path: &str, range: Range<u64>) -> TableResult<Vec<Row>> {
        let rows = &self.table(path)?.rows;
        let len = rows.len() as u64;
        let start = range.start.min(len) as usize;
        let end = range.end.min(len) as usize;
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(rows[start..end].to_vec())
    }

    async fn append_rows(&mut self, path: &str, rows: Vec<Row>) -> TableResult<()> {
        self.table_mut(path)?.rows.extend(rows);
        Ok(())
    }

    async fn erase_range(&mut self, path: &str, range: Range<u64>) -> TableResult<()> {
        let table = self.table_mut(path)?;
        let bounds = check_bounds(path, &range, table.rows.len())?;
        debug!(path, start = range.start, end = range.end, "Erasing rows");
        table.rows.drain(bounds);
        self.erased = true;
        Ok(())
    }

    async fn merge_ordered(&mut self, request: &MergeRequest) -> TableResult<()> {
        self.ensure_open()?;
        if FaultInjector::take(&self.faults.failing_merges) {
            warn!(source = %request.source, "Injected merge failure");
            return Err(TableError::transient("injected merge failure"));
        }

        let source = self.table(&request.source)?;
        let bounds = check_bounds(&request.source, &request.range, source.rows.len())?;
        let moved = source.rows[bounds].to_vec();

        let destination = self.table_mut(&request.destination)?;
        destination.rows.extend(moved);
        destination.attributes.insert(
            "compression_codec".to_string(),
            Value::String(request.compression_codec.clone()),
        );
        debug!(
            source = %request.source,
            destination = %request.destination,
            start = request.range.start,
            end = request.range.end,
            data_size_per_job = request.data_size_per_job,
            "Ordered merge complete"
        );
        Ok(())
    }

    async fn commit(&mut self) -> TableResult<()> {
        let mut guard = self.guard.take().ok_or(TableError::TransactionFinished)?;
        if FaultInjector::take(&self.faults.failing_commits) {
            warn!("Injected commit failure");
            return Err(TableError::transient("injected commit failure"));
        }
        if self.erased && FaultInjector::take(&self.faults.failing_erase_commits) {
            warn!("Injected erase commit failure");
            return Err(TableError::transient("injected erase commit failure"));
        }
        *guard = std::mem::take(&mut self.working);
        trace!("Transaction committed");
        Ok(())
    }
}
