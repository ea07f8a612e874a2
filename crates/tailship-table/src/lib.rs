//! # Tailship Table
//!
//! Ordered table service abstraction for tailship.
//!
//! The event log lives in an ordered, append-only table owned by an external
//! store. This crate describes the slice of that store tailship relies on:
//!
//! - **TableService**: starts transactions
//! - **TableTransaction**: range reads and erases, attributes, existence and
//!   row-count queries, table creation and ordered merges, all applied
//!   atomically on commit
//! - **InMemoryTableService**: in-memory implementation with fault injection
//!   for tests and dry runs
//!
//! Row indices handed to a transaction are physical: index 0 is the first
//! row still present in the table.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tailship_table::{InMemoryTableService, TableService, TableTransaction};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = InMemoryTableService::new();
//!     service.create("//logs/events").await;
//!
//!     let mut tx = service.begin().await.unwrap();
//!     tx.set_attribute("//logs/events", "row_to_save", 0.into()).await.unwrap();
//!     tx.commit().await.unwrap();
//! }
//! ```

pub mod error;
pub mod memory;

use std::ops::Range;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tailship_core::Row;

pub use error::{TableError, TableResult};
pub use memory::{FaultInjector, InMemoryTableService, InMemoryTransaction};

/// Options for [`TableTransaction::create_table`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Succeed without changes when the table already exists
    pub ignore_existing: bool,
    /// Attributes set on the new table
    pub attributes: Map<String, Value>,
}

impl CreateOptions {
    /// Create-if-absent options
    pub fn ignore_existing() -> Self {
        Self {
            ignore_existing: true,
            ..Default::default()
        }
    }

    /// Set an attribute on the created table
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// An ordered merge job: append `source[range]` to `destination`, preserving row order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub source: String,
    pub range: Range<u64>,
    pub destination: String,
    pub compression_codec: String,
    /// Job sizing hint in bytes of input per job
    pub data_size_per_job: u64,
    pub desired_chunk_size: u64,
}

/// Entry point to the table store
#[async_trait]
pub trait TableService: Send + Sync {
    /// Transaction type handed out by this service
    type Transaction: TableTransaction;

    /// Start a transaction
    ///
    /// Changes made through the transaction become visible only on
    /// [`TableTransaction::commit`]. Dropping an uncommitted transaction
    /// aborts it.
    async fn begin(&self) -> TableResult<Self::Transaction>;
}

/// Operations available inside a transaction
///
/// Once `commit` has been called, successfully or not, every further call
/// returns [`TableError::TransactionFinished`].
#[async_trait]
pub trait TableTransaction: Send + Sync {
    /// Check whether a table exists
    async fn exists(&self, path: &str) -> TableResult<bool>;

    /// Number of rows physically present in the table
    async fn row_count(&self, path: &str) -> TableResult<u64>;

    /// Read a table attribute, `None` when unset
    async fn get_attribute(&self, path: &str, name: &str) -> TableResult<Option<Value>>;

    /// Set a table attribute
    async fn set_attribute(&mut self, path: &str, name: &str, value: Value) -> TableResult<()>;

    /// Create a table
    async fn create_table(&mut self, path: &str, options: &CreateOptions) -> TableResult<()>;

    /// Read rows in `range`
    ///
    /// The range is clamped to the rows present, so a read past the end
    /// returns fewer rows rather than failing.
    async fn read_range(&self, path: &str, range: Range<u64>) -> TableResult<Vec<Row>>;

    /// Append rows at the end of the table
    async fn append_rows(&mut self, path: &str, rows: Vec<Row>) -> TableResult<()>;

    /// Erase rows in `range`; the range must lie within the table
    async fn erase_range(&mut self, path: &str, range: Range<u64>) -> TableResult<()>;

    /// Run an ordered merge job
    async fn merge_ordered(&mut self, request: &MergeRequest) -> TableResult<()>;

    /// Apply every change made in this transaction
    async fn commit(&mut self) -> TableResult<()>;

    /// Read an attribute holding a non-negative integer
    async fn get_u64_attribute(&self, path: &str, name: &str) -> TableResult<Option<u64>> {
        match self.get_attribute(path, name).await? {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                TableError::invalid_attribute(name, format!("expected unsigned integer, got {value}"))
            }),
        }
    }
}
