//! Connection configuration

use std::time::Duration;

/// Default port of the session (control) connection
pub const DEFAULT_SESSION_PORT: u16 = 80;
/// Default port of the push (data) connection
pub const DEFAULT_PUSH_PORT: u16 = 9000;
/// Value of the `RTSTreamFormat` push header
pub const DEFAULT_STREAM_FORMAT: &str = "v2le";
/// Default service id announced in handshakes
pub const DEFAULT_SERVICE_ID: &str = "yt";
/// Default source id announced in handshakes
pub const DEFAULT_SOURCE_ID: &str = "tramsmm43";

/// Configuration for LogBroker connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Port of the session stream
    pub session_port: u16,
    /// Port of the push stream
    pub push_port: u16,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Pause before retrying a refused or dropped session handshake, in milliseconds
    pub reconnect_interval_ms: u64,
    /// Handshake attempts before giving up (None = retry indefinitely)
    pub max_connect_attempts: Option<u32>,
    /// Upper bound on the size of the handshake response headers
    pub max_header_bytes: usize,
    /// Upper bound on the length line of a control frame
    pub max_frame_line_bytes: usize,
    /// Stream format advertised on the push stream
    pub stream_format: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            session_port: DEFAULT_SESSION_PORT,
            push_port: DEFAULT_PUSH_PORT,
            connect_timeout_ms: 10_000,
            reconnect_interval_ms: 60_000,
            max_connect_attempts: None,
            max_header_bytes: 1024 * 1024,
            max_frame_line_bytes: 4 * 1024,
            stream_format: DEFAULT_STREAM_FORMAT.to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Use non-default ports
    pub fn with_ports(mut self, session_port: u16, push_port: u16) -> Self {
        self.session_port = session_port;
        self.push_port = push_port;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the pause between handshake attempts
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Bound the number of handshake attempts
    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = Some(attempts.max(1));
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Identity of the log source, sent with the session handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Service id (`ident` query parameter)
    pub service_id: String,
    /// Source id (`sourceid` query parameter)
    pub source_id: String,
    /// Log type (`logtype` query parameter)
    pub logtype: String,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            service_id: DEFAULT_SERVICE_ID.to_string(),
            source_id: DEFAULT_SOURCE_ID.to_string(),
            logtype: String::new(),
        }
    }
}

impl SessionParams {
    pub fn new(
        service_id: impl Into<String>,
        source_id: impl Into<String>,
        logtype: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            source_id: source_id.into(),
            logtype: logtype.into(),
        }
    }
}
