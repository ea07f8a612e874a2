//! Pending chunk registry
//!
//! Tracks one completion per submitted seqno together with the acknowledged
//! watermark. Acks resolve every pending seqno up to the acked value, skips
//! resolve exactly one seqno, and an abort resolves everything with the
//! failure that ended the session.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{ChunkError, ChunkResult, ClientError, ClientResult, ProtocolError, TransportError};

/// Completion handle of a submitted chunk
///
/// Resolves to the acknowledged watermark covering the chunk, or to the
/// error that aborted the session.
#[derive(Debug)]
pub struct ChunkCompletion {
    seqno: u64,
    receiver: oneshot::Receiver<ChunkResult>,
}

impl ChunkCompletion {
    /// Seqno the chunk was submitted with
    pub fn seqno(&self) -> u64 {
        self.seqno
    }
}

impl Future for ChunkCompletion {
    type Output = ChunkResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ChunkResult> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ChunkError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Map from seqno to completion plus the acknowledged watermark
#[derive(Debug, Default)]
pub struct PendingRegistry {
    pending: BTreeMap<u64, oneshot::Sender<ChunkResult>>,
    last_acked: u64,
    aborted: Option<Arc<TransportError>>,
}

impl PendingRegistry {
    /// Create an empty registry starting at watermark `last_acked`
    pub fn new(last_acked: u64) -> Self {
        Self {
            last_acked,
            ..Default::default()
        }
    }

    pub fn last_acked(&self) -> u64 {
        self.last_acked
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, seqno: u64) -> bool {
        self.pending.contains_key(&seqno)
    }

    /// Seqnos awaiting acknowledgement, ascending
    pub fn pending_seqnos(&self) -> Vec<u64> {
        self.pending.keys().copied().collect()
    }

    /// Error the registry was aborted with, if any
    pub fn abort_error(&self) -> Option<Arc<TransportError>> {
        self.aborted.clone()
    }

    /// Register a completion for `seqno`
    pub fn register(&mut self, seqno: u64) -> ClientResult<ChunkCompletion> {
        if let Some(error) = &self.aborted {
            return Err(ClientError::Aborted(Arc::clone(error)));
        }
        if self.contains(seqno) {
            return Err(ClientError::DuplicateSeqno(seqno));
        }
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(seqno, sender);
        trace!(seqno, pending = self.pending.len(), "Registered chunk");
        Ok(ChunkCompletion { seqno, receiver })
    }

    /// Apply a cumulative acknowledgement
    ///
    /// Every pending seqno `<= seqno` resolves with `seqno`, ascending.
    /// Returns how many completions were resolved.
    pub fn apply_ack(&mut self, seqno: u64) -> Result<usize, ProtocolError> {
        if seqno < self.last_acked {
            return Err(ProtocolError::AckRegression {
                acked: seqno,
                watermark: self.last_acked,
            });
        }
        trace!(old = self.last_acked, new = seqno, "Updating last acked seqno");
        self.last_acked = seqno;

        let above = match seqno.checked_add(1) {
            Some(next) => self.pending.split_off(&next),
            None => BTreeMap::new(),
        };
        let resolved = std::mem::replace(&mut self.pending, above);
        let count = resolved.len();
        for (pending_seqno, sender) in resolved {
            trace!(seqno = pending_seqno, acked = seqno, "Chunk acknowledged");
            let _ = sender.send(Ok(seqno));
        }
        Ok(count)
    }

    /// Apply a skip of exactly `seqno`
    ///
    /// A pending completion for `seqno` resolves with the watermark as it was
    /// before the skip, then the watermark advances to `seqno` if larger.
    /// Returns whether a completion was resolved.
    pub fn apply_skip(&mut self, seqno: u64) -> bool {
        let Some(sender) = self.pending.remove(&seqno) else {
            return false;
        };
        let prior = self.last_acked;
        let _ = sender.send(Ok(prior));
        if seqno > self.last_acked {
            trace!(old = self.last_acked, new = seqno, "Updating last acked seqno");
            self.last_acked = seqno;
        }
        true
    }

    /// Resolve every pending completion with `error` and refuse new ones
    ///
    /// Returns how many completions were resolved.
    pub fn abort(&mut self, error: Arc<TransportError>) -> usize {
        debug!(seqnos = ?self.pending_seqnos(), error = %error, "Aborting pending chunks");
        let resolved = std::mem::take(&mut self.pending);
        let count = resolved.len();
        for (_, sender) in resolved {
            let _ = sender.send(Err(ChunkError::Aborted(Arc::clone(&error))));
        }
        self.aborted = Some(error);
        count
    }
}
