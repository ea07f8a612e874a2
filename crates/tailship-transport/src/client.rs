//! LogBroker client
//!
//! Ties a session stream and a push stream into a single "submit a chunk,
//! learn when it is durable" contract. Submissions go out on the push
//! stream while a background task reads control messages from the session
//! stream and resolves completions through the [`PendingRegistry`].
//!
//! Any failure on the session stream aborts the client: every pending
//! completion resolves with that error and both connections are closed.
//! Reconnecting and resubmitting unacknowledged chunks is left to the
//! caller.

use std::sync::Arc;

use parking_lot::Mutex;
use tailship_core::{Row, serialize_chunk};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{ConnectionConfig, SessionParams};
use crate::error::{ClientError, ClientResult, TransportError};
use crate::pending::{ChunkCompletion, PendingRegistry};
use crate::protocol::{SessionMessage, SessionMetadata};
use crate::push::PushStream;
use crate::session::SessionStream;

/// Reserved chunk id carried in every chunk header
pub const CHUNK_ID: u64 = 0;

type SharedPush = Arc<AsyncMutex<Option<PushStream>>>;

/// Client of a single LogBroker session
pub struct LogBrokerClient {
    params: SessionParams,
    config: ConnectionConfig,
    registry: Arc<Mutex<PendingRegistry>>,
    push: SharedPush,
    reader: Option<JoinHandle<()>>,
    metadata: Option<SessionMetadata>,
}

impl LogBrokerClient {
    /// Create a disconnected client
    pub fn new(params: SessionParams, config: ConnectionConfig) -> Self {
        Self {
            params,
            config,
            registry: Arc::new(Mutex::new(PendingRegistry::default())),
            push: Arc::new(AsyncMutex::new(None)),
            reader: None,
            metadata: None,
        }
    }

    /// Open the session stream, then the push stream, then start reading control messages
    ///
    /// The acknowledged watermark starts at the `seqno` announced in the
    /// handshake.
    #[instrument(skip(self), fields(service = %self.params.service_id))]
    pub async fn connect(&mut self, host: &str) -> ClientResult<()> {
        if self.reader.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        info!("Connecting session stream");
        let session = SessionStream::connect(host, &self.params, &self.config).await?;
        let seqno = session
            .metadata()
            .seqno()
            .map_err(TransportError::from)?;
        let session_id = session.session_id().to_string();

        info!(session = %session_id, "Connecting push stream");
        let push = PushStream::connect(host, &session_id, &self.config).await?;

        *self.registry.lock() = PendingRegistry::new(seqno);
        *self.push.lock().await = Some(push);
        self.metadata = Some(session.metadata().clone());
        self.reader = Some(tokio::spawn(read_session(
            session,
            Arc::clone(&self.registry),
            Arc::clone(&self.push),
        )));

        info!(session = %session_id, last_acked = seqno, "LogBroker client connected");
        Ok(())
    }

    /// Submit a chunk and return its completion
    ///
    /// The completion is registered before the chunk is written, so an ack
    /// arriving right after the write always finds it. A failed write aborts
    /// the client and the returned completion resolves with the write error.
    pub async fn save_chunk(&self, seqno: u64, rows: &[Row]) -> ClientResult<ChunkCompletion> {
        if self.reader.is_none() {
            return Err(ClientError::NotConnected);
        }

        let payload = serialize_chunk(CHUNK_ID, seqno, rows.len() as u64, rows)
            .map_err(TransportError::from)?;
        let completion = self.registry.lock().register(seqno)?;

        let mut push = self.push.lock().await;
        let Some(stream) = push.as_mut() else {
            // Aborted concurrently; the registry already resolved the completion.
            return Ok(completion);
        };

        if let Err(e) = stream.write_chunk(&payload).await {
            warn!(seqno, error = %e, "Push stream write failed");
            stream.stop();
            *push = None;
            drop(push);
            self.registry.lock().abort(Arc::new(e));
            if let Some(reader) = &self.reader {
                reader.abort();
            }
            return Ok(completion);
        }

        debug!(seqno, rows = rows.len(), bytes = payload.len(), "Chunk submitted");
        Ok(completion)
    }

    /// Close both streams
    ///
    /// Fails with [`ClientError::PendingChunks`] while any submission is
    /// unresolved. Stopping a disconnected client is a no-op.
    pub async fn stop(&mut self) -> ClientResult<()> {
        let pending = self.registry.lock().len();
        if pending > 0 {
            return Err(ClientError::PendingChunks(pending));
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut push) = self.push.lock().await.take() {
            push.stop();
        }
        if let Some(metadata) = self.metadata.take() {
            info!(session = %metadata.session_id, "LogBroker client stopped");
        }
        Ok(())
    }

    /// Highest acknowledged seqno
    pub fn last_acked_seqno(&self) -> u64 {
        self.registry.lock().last_acked()
    }

    /// Number of submitted chunks awaiting acknowledgement
    pub fn pending_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Error that aborted the current session, if any
    pub fn abort_error(&self) -> Option<Arc<TransportError>> {
        self.registry.lock().abort_error()
    }

    /// Whether the client has a live session
    pub fn is_connected(&self) -> bool {
        self.reader.is_some() && self.abort_error().is_none()
    }

    /// Handshake metadata of the current session
    pub fn session(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }
}

impl Drop for LogBrokerClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for LogBrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBrokerClient")
            .field("params", &self.params)
            .field("session", &self.metadata.as_ref().map(|m| &m.session_id))
            .field("connected", &self.reader.is_some())
            .finish()
    }
}

async fn read_session(
    mut session: SessionStream,
    registry: Arc<Mutex<PendingRegistry>>,
    push: SharedPush,
) {
    loop {
        let message = match session.read_message().await {
            Ok(message) => message,
            Err(e) => {
                abort(e, &mut session, &registry, &push).await;
                return;
            }
        };
        trace!(kind = message.kind(), "Received session message");

        let applied = match message {
            SessionMessage::Ping | SessionMessage::Eof => Ok(()),
            SessionMessage::Skip { seqno, .. } => {
                let resolved = registry.lock().apply_skip(seqno);
                debug!(seqno, resolved, "Skip received");
                Ok(())
            }
            SessionMessage::Ack { seqno, .. } => registry
                .lock()
                .apply_ack(seqno)
                .map(|resolved| debug!(seqno, resolved, "Ack received")),
        };

        if let Err(e) = applied {
            abort(e.into(), &mut session, &registry, &push).await;
            return;
        }
    }
}

async fn abort(
    error: TransportError,
    session: &mut SessionStream,
    registry: &Mutex<PendingRegistry>,
    push: &AsyncMutex<Option<PushStream>>,
) {
    let error = Arc::new(error);
    let resolved = registry.lock().abort(Arc::clone(&error));
    if matches!(*error, TransportError::SessionEnd) {
        info!(session = %session.session_id(), pending = resolved, "Session ended, aborting LogBroker client");
    } else {
        warn!(session = %session.session_id(), pending = resolved, error = %error, "Aborting LogBroker client");
    }
    if let Some(mut stream) = push.lock().await.take() {
        stream.stop();
    }
    session.stop();
}
