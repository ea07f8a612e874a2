//! Error types for the row and chunk codecs

use thiserror::Error;

/// Errors raised while encoding or decoding rows and chunks
#[derive(Debug, Error)]
pub enum CodecError {
    /// The chunk envelope or header could not be located or unpacked
    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    /// A TSKV line does not follow the `tskv\tkey=value...` grammar
    #[error("Malformed row: {0}")]
    MalformedRow(String),

    /// A backslash sequence outside the reserved escape set
    #[error("Invalid escape sequence: {0:?}")]
    InvalidEscape(String),

    /// JSON serialization of a field value failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Create a new MalformedChunk error
    pub fn malformed_chunk(message: impl Into<String>) -> Self {
        Self::MalformedChunk(message.into())
    }

    /// Create a new MalformedRow error
    pub fn malformed_row(message: impl Into<String>) -> Self {
        Self::MalformedRow(message.into())
    }
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
