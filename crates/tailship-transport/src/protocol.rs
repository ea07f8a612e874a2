//! LogBroker wire protocol
//!
//! Text-level pieces of the protocol, independent of any socket:
//!
//! - handshake requests for the session and push connections
//! - parsing of the session handshake response into [`SessionMetadata`]
//! - parsing of control frame payloads into [`SessionMessage`]
//!
//! Control frame payload grammar:
//!
//! ```text
//! ping...
//! eof...
//! [tag...] key=value [key=value...]
//! ```
//!
//! Leading tokens without `=` are tags. A first tag of `skip` marks a skip;
//! anything else is an acknowledgement. Every attribute value is an
//! unsigned integer and `seqno` must be present.

use std::collections::{BTreeMap, HashMap};

use crate::config::SessionParams;
use crate::error::ProtocolError;

/// Path of the session handshake
pub const SESSION_PATH: &str = "/rt/session";
/// Path of the push stream
pub const PUSH_PATH: &str = "/rt/store";
/// Terminator of the handshake response headers
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
/// Line terminator used throughout the protocol
pub const CRLF: &[u8] = b"\r\n";

/// A decoded control message from the session stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    /// Keep-alive, carries no information
    Ping,
    /// End-of-data marker, carries no information
    Eof,
    /// Every chunk with a seqno up to and including `seqno` is durable
    Ack {
        seqno: u64,
        attributes: BTreeMap<String, u64>,
    },
    /// The chunk with exactly this seqno was rejected
    Skip {
        seqno: u64,
        attributes: BTreeMap<String, u64>,
    },
}

impl SessionMessage {
    /// Parse a control frame payload
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let line = payload.trim();
        if line.starts_with("ping") {
            return Ok(Self::Ping);
        }
        if line.starts_with("eof") {
            return Ok(Self::Eof);
        }

        let mut tags = Vec::new();
        let mut attributes = BTreeMap::new();
        for token in line.split_whitespace() {
            match token.split_once('=') {
                None if attributes.is_empty() => tags.push(token),
                None => {
                    return Err(ProtocolError::bad_protocol(format!(
                        "expected key=value, got {token:?}"
                    )));
                }
                Some((key, value)) => {
                    let value = value.parse::<u64>().map_err(|_| {
                        ProtocolError::bad_protocol(format!("non-integer attribute {token:?}"))
                    })?;
                    attributes.insert(key.to_string(), value);
                }
            }
        }

        if tags.is_empty() && attributes.is_empty() {
            return Err(ProtocolError::bad_protocol("empty control frame"));
        }

        let seqno = *attributes
            .get("seqno")
            .ok_or_else(|| ProtocolError::MissingAttribute("seqno".to_string()))?;

        if tags.first() == Some(&"skip") {
            Ok(Self::Skip { seqno, attributes })
        } else {
            Ok(Self::Ack { seqno, attributes })
        }
    }

    /// Name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Eof => "eof",
            Self::Ack { .. } => "ack",
            Self::Skip { .. } => "skip",
        }
    }
}

/// Build the session handshake request
pub fn session_request(host: &str, params: &SessionParams) -> String {
    format!(
        "GET {SESSION_PATH}?ident={}&sourceid={}&logtype={} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Accept: */*\r\n\
         \r\n",
        params.service_id, params.source_id, params.logtype
    )
}

/// Build the push stream request headers
pub fn push_request(host: &str, session_id: &str, stream_format: &str) -> String {
    format!(
        "PUT {PUSH_PATH} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Content-Type: text/plain\r\n\
         Content-Encoding: gzip\r\n\
         Transfer-Encoding: chunked\r\n\
         RTSTreamFormat: {stream_format}\r\n\
         Session: {session_id}\r\n\
         \r\n"
    )
}

/// Session token and attributes from the handshake response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    pub session_id: String,
    /// Header values keyed by lowercased header name
    pub attributes: HashMap<String, String>,
}

impl SessionMetadata {
    /// Parse the header block of the handshake response
    ///
    /// The status line is skipped. Keys are trimmed and lowercased, values
    /// trimmed. Fails with [`ProtocolError::SessionIdNotFound`] when no
    /// `session` header is present.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let mut attributes = HashMap::new();
        for line in raw.split('\n').skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                ProtocolError::bad_protocol(format!("malformed header line {line:?}"))
            })?;
            attributes.insert(key.trim().to_lowercase(), value.trim().to_string());
        }

        let session_id = attributes
            .get("session")
            .cloned()
            .ok_or(ProtocolError::SessionIdNotFound)?;
        Ok(Self {
            session_id,
            attributes,
        })
    }

    /// Header value by lowercased name
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Starting acknowledged seqno announced by the server
    pub fn seqno(&self) -> Result<u64, ProtocolError> {
        let raw = self
            .get("seqno")
            .ok_or_else(|| ProtocolError::MissingAttribute("seqno".to_string()))?;
        raw.parse()
            .map_err(|_| ProtocolError::bad_protocol(format!("non-integer seqno {raw:?}")))
    }
}

/// Parse the hexadecimal length line of a control frame
pub fn parse_frame_length(line: &str) -> Result<usize, ProtocolError> {
    let trimmed = line.trim();
    usize::from_str_radix(trimmed, 16)
        .map_err(|_| ProtocolError::bad_protocol(format!("bad chunk length line {trimmed:?}")))
}
