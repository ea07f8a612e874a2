//! Live-tailing shipper
//!
//! Streams new event log rows to LogBroker, one session at a time. Progress
//! is recorded in `row_to_save` only once LogBroker acknowledges a chunk, so
//! a failed session is recovered by opening a new one and resuming from
//! there.

use std::collections::VecDeque;

use tailship_eventlog::EventLog;
use tailship_table::TableService;
use tailship_transport::{
    ChunkCompletion, ClientError, ConnectionConfig, EndpointResolver, LogBrokerClient,
    SessionParams,
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::config::ShipperConfig;
use crate::error::ShipperResult;
use crate::transform::RowTransform;

/// Ships an event log to LogBroker until told to stop
pub struct Shipper<S: TableService> {
    log: EventLog<S>,
    resolver: Box<dyn EndpointResolver>,
    params: SessionParams,
    connection: ConnectionConfig,
    config: ShipperConfig,
    transform: RowTransform,
}

impl<S: TableService> Shipper<S> {
    pub fn new(
        log: EventLog<S>,
        resolver: Box<dyn EndpointResolver>,
        params: SessionParams,
        connection: ConnectionConfig,
        config: ShipperConfig,
    ) -> Self {
        let transform = RowTransform::new(&config.cluster_name, &config.log_name)
            .with_strip_error(config.strip_error);
        Self {
            log,
            resolver,
            params,
            connection,
            config,
            transform,
        }
    }

    pub fn event_log(&self) -> &EventLog<S> {
        &self.log
    }

    /// Run sessions back to back until `shutdown` fires
    ///
    /// A failed session is logged and replaced after the reconnect delay.
    /// Unacknowledged chunks of the failed session are shipped again by the
    /// next one.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> ShipperResult<()> {
        info!(
            table = %self.log.table(),
            chunk_size = self.config.chunk_size,
            ack_queue_length = self.config.ack_queue_length,
            "Shipper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                result = self.run_session() => {
                    if let Err(e) = result {
                        warn!(
                            error = %e,
                            retry_in_ms = self.config.reconnect_delay_ms,
                            "Session failed"
                        );
                    }
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }
        }

        info!("Shipper shutting down");
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.log.table()))]
    async fn run_session(&self) -> ShipperResult<()> {
        let host = self.resolver.resolve().await?;
        let mut client = LogBrokerClient::new(self.params.clone(), self.connection.clone());
        client.connect(&host).await?;

        let session_seqno = client.last_acked_seqno();
        let mut next_row = self.log.row_to_save().await?;
        if session_seqno > next_row {
            let end_row = self.log.end_row().await?;
            self.log.set_row_to_save(session_seqno.min(end_row)).await?;
            next_row = session_seqno;
        }
        info!(host = %host, session_seqno, next_row, "Session established");

        let ack_queue_length = self.config.ack_queue_length.max(1);
        let chunk_size = self.config.chunk_size.max(1) as u64;

        let mut in_flight: VecDeque<ChunkCompletion> = VecDeque::new();
        loop {
            if let Some(error) = client.abort_error() {
                return Err(ClientError::Aborted(error).into());
            }

            while in_flight.len() >= ack_queue_length {
                if let Some(completion) = in_flight.pop_front() {
                    self.settle(completion).await?;
                }
            }

            let end_row = self.log.end_row().await?;
            if next_row >= end_row {
                match in_flight.pop_front() {
                    Some(completion) => self.settle(completion).await?,
                    None => tokio::time::sleep(self.config.poll_interval()).await,
                }
                continue;
            }

            let count = (end_row - next_row).min(chunk_size);
            let rows = self.log.get_data(next_row, count).await?;
            let mut prepared = Vec::with_capacity(rows.len());
            for (offset, row) in rows.into_iter().enumerate() {
                match self.transform.apply(row) {
                    Ok(row) => prepared.push(row),
                    Err(e) => warn!(row = next_row + offset as u64, error = %e, "Skipping row"),
                }
            }

            let seqno = next_row + count;
            let completion = client.save_chunk(seqno, &prepared).await?;
            debug!(seqno, rows = prepared.len(), "Chunk submitted");
            in_flight.push_back(completion);
            next_row = seqno;
        }
    }

    async fn settle(&self, completion: ChunkCompletion) -> ShipperResult<()> {
        let seqno = completion.seqno();
        let acked = completion.await?;
        let row_to_save = self.log.set_row_to_save(acked).await?;
        debug!(seqno, acked, row_to_save, "Chunk acknowledged");
        Ok(())
    }
}
