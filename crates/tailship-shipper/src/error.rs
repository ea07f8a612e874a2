//! Error types for the shipper

use tailship_eventlog::EventLogError;
use tailship_transport::{ChunkError, ClientError, TransportError};
use thiserror::Error;

/// Errors that can occur while shipping or running a command
#[derive(Debug, Error)]
pub enum ShipperError {
    /// Event log read or offset update failed
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// Endpoint discovery or connection failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The LogBroker client rejected an operation
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// A pushed chunk was never acknowledged
    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// A row could not be prepared for shipping
    #[error("Transform error: {0}")]
    Transform(String),

    /// No table service is bound to the event log and `--dry-run` is off
    #[error("No table service is bound to {0}; pass --dry-run to use an empty in-memory table")]
    NoTableService(String),
}

impl ShipperError {
    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }
}

/// Result type alias for shipper operations
pub type ShipperResult<T> = Result<T, ShipperError>;
