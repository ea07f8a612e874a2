//! Transport layer error types

use std::sync::Arc;

use tailship_core::CodecError;
use thiserror::Error;

/// Violations of the LogBroker wire grammar
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Bad protocol: {0}")]
    BadProtocol(String),

    #[error("Session id not found in handshake response")]
    SessionIdNotFound,

    #[error("Missing attribute: {0}")]
    MissingAttribute(String),

    #[error("Ack for seqno {acked} is below the acknowledged watermark {watermark}")]
    AckRegression { acked: u64, watermark: u64 },
}

impl ProtocolError {
    /// Create a new BadProtocol error
    pub fn bad_protocol(message: impl Into<String>) -> Self {
        Self::BadProtocol(message.into())
    }
}

/// Unified transport error type
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server finished the session with a zero-length frame
    #[error("Session ended by server")]
    SessionEnd,

    #[error("Stream closed")]
    StreamClosed,

    #[error("Timeout after {0} ms")]
    Timeout(u64),

    #[error("Endpoint discovery failed: {0}")]
    Discovery(String),
}

impl TransportError {
    /// Whether a failed session handshake may be retried
    ///
    /// Connection-level failures and a response without a session id are
    /// retried. Grammar violations are not.
    pub fn is_retryable_on_connect(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::StreamClosed
                | Self::Timeout(_)
                | Self::Protocol(ProtocolError::SessionIdNotFound)
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors returned by [`crate::LogBrokerClient`] operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client is already connected")]
    AlreadyConnected,

    #[error("Client is not connected")]
    NotConnected,

    #[error("Chunk with seqno {0} is already pending")]
    DuplicateSeqno(u64),

    #[error("Cannot stop with {0} chunks still pending")]
    PendingChunks(usize),

    /// The client was aborted by a session failure
    #[error("Client aborted: {0}")]
    Aborted(Arc<TransportError>),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Failure outcome of a chunk completion
#[derive(Debug, Clone, Error)]
pub enum ChunkError {
    /// The session failed before the chunk was acknowledged
    #[error("Chunk aborted: {0}")]
    Aborted(Arc<TransportError>),

    /// The completion handle was dropped without being resolved
    #[error("Chunk completion cancelled")]
    Cancelled,
}

/// Outcome of a submitted chunk: the acknowledged watermark that covers it
pub type ChunkResult = Result<u64, ChunkError>;
