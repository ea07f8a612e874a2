//! Push stream
//!
//! The data connection of a LogBroker session: a streaming PUT whose body is
//! a sequence of chunked-transfer frames, one per serialized chunk.
//! Acknowledgements arrive on the session stream, so whatever the server
//! writes back here is only logged.

use tailship_core::frame_chunk;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::config::ConnectionConfig;
use crate::error::{TransportError, TransportResult};
use crate::protocol::push_request;
use crate::session::connect_tcp;

/// Upload connection bound to a session
#[derive(Debug)]
pub struct PushStream {
    writer: Option<OwnedWriteHalf>,
    drain: Option<JoinHandle<()>>,
    session_id: String,
}

impl PushStream {
    /// Open the push connection for `session_id` and start draining responses
    #[instrument(skip(config), fields(port = config.push_port))]
    pub async fn connect(
        host: &str,
        session_id: &str,
        config: &ConnectionConfig,
    ) -> TransportResult<Self> {
        let tcp = connect_tcp(host, config.push_port, config).await?;
        let (reader, mut writer) = tcp.into_split();
        writer
            .write_all(push_request(host, session_id, &config.stream_format).as_bytes())
            .await?;
        info!(session = %session_id, "Push stream established");

        let drain = tokio::spawn(drain_responses(reader, session_id.to_string()));
        Ok(Self {
            writer: Some(writer),
            drain: Some(drain),
            session_id: session_id.to_string(),
        })
    }

    /// Write one serialized chunk as a chunked-transfer frame
    pub async fn write_chunk(&mut self, payload: &[u8]) -> TransportResult<()> {
        let writer = self.writer.as_mut().ok_or(TransportError::StreamClosed)?;
        let frame = frame_chunk(payload);
        debug!(session = %self.session_id, bytes = frame.len(), "Writing to push stream");
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the connection; idempotent
    pub fn stop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        if self.writer.take().is_some() {
            debug!(session = %self.session_id, "Push stream closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn drain_responses(mut reader: OwnedReadHalf, session_id: String) {
    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                debug!(
                    session = %session_id,
                    data = %String::from_utf8_lossy(&buf[..n]),
                    "Received data from push stream"
                );
            }
            Err(e) => {
                debug!(session = %session_id, error = %e, "Push stream read failed");
                break;
            }
        }
    }
    debug!(session = %session_id, "Push stream was closed by server");
}
