//! Session stream
//!
//! The control connection of a LogBroker session. A long-lived GET request
//! mints the session token, after which the server streams control frames
//! in HTTP chunked-transfer encoding.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConnectionConfig, SessionParams};
use crate::error::{ProtocolError, TransportError, TransportResult};
use crate::protocol::{
    CRLF, HEADER_TERMINATOR, SessionMessage, SessionMetadata, parse_frame_length, session_request,
};

/// Read up to and including `delimiter`, failing once `max_bytes` are consumed without it
pub(crate) async fn read_until_delimiter<R>(
    reader: &mut R,
    delimiter: &[u8],
    max_bytes: usize,
) -> TransportResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(&last) = delimiter.last() else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    loop {
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            return Err(ProtocolError::bad_protocol(format!(
                "no delimiter within {max_bytes} bytes"
            ))
            .into());
        }
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(last, &mut buf)
            .await?;
        if n == 0 {
            return Err(TransportError::StreamClosed);
        }
        if buf.ends_with(delimiter) {
            return Ok(buf);
        }
    }
}

/// Open a TCP connection within the configured timeout
pub(crate) async fn connect_tcp(
    host: &str,
    port: u16,
    config: &ConnectionConfig,
) -> TransportResult<TcpStream> {
    let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect((host, port)))
        .await
        .map_err(|_| {
            warn!(
                host,
                port,
                timeout_ms = config.connect_timeout_ms,
                "Connection timeout"
            );
            TransportError::Timeout(config.connect_timeout_ms)
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Control connection of an open session
#[derive(Debug)]
pub struct SessionStream {
    stream: Option<BufReader<TcpStream>>,
    metadata: SessionMetadata,
    max_frame_line_bytes: usize,
    max_frame_bytes: usize,
}

impl SessionStream {
    /// Open a session on `host`
    ///
    /// Connection failures and responses without a session token are
    /// retried after `reconnect_interval`, indefinitely unless
    /// `max_connect_attempts` is set. Protocol violations fail immediately.
    #[instrument(skip(params, config), fields(port = config.session_port))]
    pub async fn connect(
        host: &str,
        params: &SessionParams,
        config: &ConnectionConfig,
    ) -> TransportResult<Self> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match Self::handshake(host, params, config).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_retryable_on_connect() => {
                    if config.max_connect_attempts.is_some_and(|max| attempts >= max) {
                        error!(attempts, error = %e, "Giving up on session handshake");
                        return Err(e);
                    }
                    warn!(
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = config.reconnect_interval_ms,
                        "Session handshake failed"
                    );
                    tokio::time::sleep(config.reconnect_interval()).await;
                }
                Err(e) => {
                    error!(error = %e, "Session handshake rejected");
                    return Err(e);
                }
            }
        }
    }

    async fn handshake(
        host: &str,
        params: &SessionParams,
        config: &ConnectionConfig,
    ) -> TransportResult<Self> {
        info!("Creating session");
        let tcp = connect_tcp(host, config.session_port, config).await?;
        let mut stream = BufReader::new(tcp);
        stream
            .get_mut()
            .write_all(session_request(host, params).as_bytes())
            .await?;

        let raw = read_until_delimiter(&mut stream, HEADER_TERMINATOR, config.max_header_bytes).await?;
        let headers = String::from_utf8_lossy(&raw[..raw.len() - HEADER_TERMINATOR.len()]);
        debug!(response = %headers, "Parsing handshake response");
        let metadata = SessionMetadata::parse(&headers)?;
        info!(session = %metadata.session_id, "Session stream established");

        Ok(Self {
            stream: Some(stream),
            metadata,
            max_frame_line_bytes: config.max_frame_line_bytes,
            max_frame_bytes: config.max_header_bytes,
        })
    }

    /// Session token issued by the server
    pub fn session_id(&self) -> &str {
        &self.metadata.session_id
    }

    /// Full handshake metadata
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    /// Read the next control message
    ///
    /// A zero-length frame drains the remaining trailers, closes the stream
    /// and yields [`TransportError::SessionEnd`].
    pub async fn read_message(&mut self) -> TransportResult<SessionMessage> {
        let stream = self.stream.as_mut().ok_or(TransportError::StreamClosed)?;

        let line = read_until_delimiter(stream, CRLF, self.max_frame_line_bytes).await?;
        let length = parse_frame_length(&String::from_utf8_lossy(&line))?;

        if length == 0 {
            let mut trailers = Vec::new();
            stream.read_to_end(&mut trailers).await?;
            debug!(trailers = %String::from_utf8_lossy(&trailers), "Session trailers");
            info!(session = %self.metadata.session_id, "Session finished by server");
            self.stream = None;
            return Err(TransportError::SessionEnd);
        }
        if length > self.max_frame_bytes {
            return Err(ProtocolError::bad_protocol(format!(
                "control frame of {length} bytes exceeds {}",
                self.max_frame_bytes
            ))
            .into());
        }

        let mut body = vec![0u8; length + CRLF.len()];
        stream.read_exact(&mut body).await?;
        let text = String::from_utf8_lossy(&body);
        debug!(status = %text.trim(), "Process status");
        Ok(SessionMessage::parse(&text)?)
    }

    /// Close the connection
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            debug!(session = %self.metadata.session_id, "Session stream closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_until_delimiter() {
        let mut reader: &[u8] = b"HTTP/1.1 200 OK\r\nSession: x\r\n\r\n5\r\n";
        let headers = read_until_delimiter(&mut reader, HEADER_TERMINATOR, 1024)
            .await
            .unwrap();
        assert_eq!(headers, b"HTTP/1.1 200 OK\r\nSession: x\r\n\r\n");
        assert_eq!(reader, b"5\r\n");
    }

    #[tokio::test]
    async fn test_read_until_delimiter_enforces_limit() {
        let mut reader: &[u8] = b"0123456789ABCDEF\r\n";
        let err = read_until_delimiter(&mut reader, CRLF, 8).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::BadProtocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_until_delimiter_on_eof() {
        let mut reader: &[u8] = b"partial";
        let err = read_until_delimiter(&mut reader, CRLF, 64).await.unwrap_err();
        assert!(matches!(err, TransportError::StreamClosed));
    }
}
