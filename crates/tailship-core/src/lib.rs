//! # Tailship Core
//!
//! Shared building blocks for the tailship log shipper.
//!
//! This crate holds everything that is independent of a live connection or a
//! table service: the row model, the TSKV row encoding, the binary chunk
//! format pushed to LogBroker, and the retry-with-backoff helper shared by the
//! archival workflow and endpoint discovery.
//!
//! ## Key Types
//!
//! - [`Row`]: a structured event-log record (JSON object)
//! - [`Chunk`] / [`ChunkHeader`]: a batch of rows with its fixed binary header
//! - [`RetryPolicy`]: exponential backoff parameters
//!
//! ## Example
//!
//! ```rust,ignore
//! use tailship_core::{encode_row, decode_row, Row};
//!
//! let mut row = Row::new();
//! row.insert("event_type".into(), "job_started".into());
//! row.insert("job_count".into(), 3.into());
//!
//! let line = encode_row(&row)?;
//! assert!(line.starts_with("tskv\t"));
//! assert_eq!(decode_row(&line)?, row);
//! ```

pub mod chunk;
pub mod error;
pub mod retry;
pub mod tskv;

pub use chunk::{
    CHUNK_HEADER_SIZE, Chunk, ChunkHeader, frame_chunk, gzip_compress, gzip_decompress,
    parse_chunk, serialize_chunk,
};
pub use error::{CodecError, CodecResult};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use tskv::{
    KEY_ESCAPE, TSKV_SENTINEL, VALUE_ESCAPE, decode_row, encode_row, escape_decode, escape_encode,
};

/// A structured event-log record.
///
/// Rows are JSON objects; field values keep their JSON type through the TSKV
/// encoding (strings travel verbatim, everything else as JSON text).
pub type Row = serde_json::Map<String, serde_json::Value>;
