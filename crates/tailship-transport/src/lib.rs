//! # Tailship Transport
//!
//! LogBroker transport for tailship.
//!
//! A LogBroker session spans two TCP connections to the same host: a session
//! stream that mints the session token and carries control messages back to
//! us, and a push stream that carries chunks out.
//!
//! ## Features
//!
//! - Control message grammar (`ping`, `eof`, acks and skips) decoded once
//!   into [`SessionMessage`]
//! - [`SessionStream`] and [`PushStream`] connection wrappers
//! - [`LogBrokerClient`] correlating pushed chunks with cumulative acks
//! - Endpoint discovery via an adviser service
//! - [`MockLogBroker`], a loopback server for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use tailship_transport::{ConnectionConfig, LogBrokerClient, SessionParams};
//!
//! let mut client = LogBrokerClient::new(SessionParams::default(), ConnectionConfig::default());
//! client.connect("logbroker.example.net").await?;
//!
//! let completion = client.save_chunk(7, &rows).await?;
//! let acked = completion.await?;
//! assert!(acked >= 7);
//!
//! client.stop().await?;
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod mock;
pub mod pending;
pub mod protocol;
pub mod push;
pub mod session;

// Re-export main types
pub use client::{CHUNK_ID, LogBrokerClient};
pub use config::{
    ConnectionConfig, DEFAULT_SERVICE_ID, DEFAULT_SOURCE_ID, SessionParams,
};
pub use discovery::{
    AdviserResolver, DEFAULT_ADVISER_URL, DiscoveryConfig, EndpointResolver, StaticResolver,
};
pub use error::{
    ChunkError, ChunkResult, ClientError, ClientResult, ProtocolError, TransportError,
    TransportResult,
};
pub use mock::MockLogBroker;
pub use pending::{ChunkCompletion, PendingRegistry};
pub use protocol::{SessionMessage, SessionMetadata};
pub use push::PushStream;
pub use session::SessionStream;
