//! Error types for tailship-eventlog

use tailship_table::TableError;
use thiserror::Error;

/// Errors that can occur in event log operations
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The table service failed
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Fewer rows than requested are available
    #[error("Not enough data: requested {requested} rows, got {got}")]
    NotEnoughData { requested: u64, got: u64 },

    /// An offset attribute is unset; the log was never initialized
    #[error("Offset attribute {0} is missing, run init first")]
    MissingOffset(String),

    /// An offset would move past the end of the log
    #[error("Offset {offset} is beyond the end of the log ({end_row})")]
    OffsetOutOfRange { offset: u64, end_row: u64 },
}

impl EventLogError {
    /// Whether the table service reported a temporary failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Table(e) if e.is_transient())
    }
}

/// Result type for event log operations
pub type EventLogResult<T> = Result<T, EventLogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_error_conversion() {
        let err: EventLogError = TableError::not_found("//logs/events").into();
        assert!(matches!(err, EventLogError::Table(TableError::NotFound(_))));
    }

    #[test]
    fn test_transient_table_errors() {
        assert!(EventLogError::from(TableError::transient("timeout")).is_transient());
        assert!(!EventLogError::from(TableError::not_found("//t")).is_transient());
        assert!(!EventLogError::MissingOffset("row_to_save".into()).is_transient());
    }

    #[test]
    fn test_not_enough_data_message() {
        let err = EventLogError::NotEnoughData {
            requested: 10,
            got: 4,
        };
        assert_eq!(err.to_string(), "Not enough data: requested 10 rows, got 4");
    }
}
