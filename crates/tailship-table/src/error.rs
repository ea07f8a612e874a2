//! Error types for tailship-table
//!
//! This module defines the error types returned by table service
//! implementations.

use thiserror::Error;

/// Errors that can occur in table operations
#[derive(Debug, Error)]
pub enum TableError {
    /// Requested table was not found
    #[error("Table not found: {0}")]
    NotFound(String),

    /// Table already exists and the caller asked for exclusive creation
    #[error("Table already exists: {0}")]
    AlreadyExists(String),

    /// Row range outside the physical bounds of the table
    #[error("Invalid range {range} for table {path}")]
    InvalidRange { path: String, range: String },

    /// The transaction was already committed or failed
    #[error("Transaction already finished")]
    TransactionFinished,

    /// Temporary failure of the remote service, safe to retry
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Attribute holds a value of an unexpected type
    #[error("Invalid attribute {name}: {reason}")]
    InvalidAttribute { name: String, reason: String },
}

impl TableError {
    /// Create a new NotFound error
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a new InvalidRange error
    pub fn invalid_range(path: impl Into<String>, range: &std::ops::Range<u64>) -> Self {
        Self::InvalidRange {
            path: path.into(),
            range: format!("[{}, {})", range.start, range.end),
        }
    }

    /// Create a new Transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a new InvalidAttribute error
    pub fn invalid_attribute(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for table operations
pub type TableResult<T> = Result<T, TableError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = TableError::not_found("//logs/scheduler");
        assert!(matches!(err, TableError::NotFound(_)));
        assert!(err.to_string().contains("//logs/scheduler"));
    }

    #[test]
    fn test_invalid_range_formats_half_open() {
        let err = TableError::invalid_range("//t", &(3..9));
        assert_eq!(err.to_string(), "Invalid range [3, 9) for table //t");
    }

    #[test]
    fn test_transient_classification() {
        assert!(TableError::transient("timeout").is_transient());
        assert!(!TableError::TransactionFinished.is_transient());
    }
}
