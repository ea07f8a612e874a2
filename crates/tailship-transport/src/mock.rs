//! In-process LogBroker server for tests
//!
//! Listens on two loopback ports, one for session handshakes and one for
//! push streams, and speaks just enough of the protocol to drive a
//! [`crate::LogBrokerClient`]: it issues session tokens, decodes pushed
//! chunks, optionally acknowledges them, and lets the test inject control
//! frames or end and drop sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tailship_core::Chunk;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::ConnectionConfig;
use crate::error::{TransportError, TransportResult};
use crate::protocol::{CRLF, HEADER_TERMINATOR, parse_frame_length};
use crate::session::read_until_delimiter;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Debug)]
enum Command {
    Frame(String),
    End,
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    initial_seqno: AtomicU64,
    auto_ack: AtomicBool,
    handshakes_without_session: AtomicU32,
    next_session: AtomicU64,
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<Command>>>,
    latest_session: Mutex<Option<String>>,
    session_requests: Mutex<Vec<String>>,
    push_requests: Mutex<Vec<String>>,
    received: Mutex<Vec<Chunk>>,
}

impl MockState {
    fn send(&self, session_id: &str, command: Command) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|tx| tx.send(command).is_ok())
    }
}

/// Loopback LogBroker server
#[derive(Debug)]
pub struct MockLogBroker {
    session_addr: SocketAddr,
    push_addr: SocketAddr,
    state: Arc<MockState>,
    acceptors: Vec<JoinHandle<()>>,
}

impl MockLogBroker {
    /// Bind both listeners on 127.0.0.1 with auto-ack enabled
    pub async fn start() -> TransportResult<Self> {
        let session_listener = TcpListener::bind("127.0.0.1:0").await?;
        let push_listener = TcpListener::bind("127.0.0.1:0").await?;
        let state = Arc::new(MockState::default());
        state.auto_ack.store(true, Ordering::SeqCst);

        let session_addr = session_listener.local_addr()?;
        let push_addr = push_listener.local_addr()?;
        let acceptors = vec![
            tokio::spawn(accept_sessions(session_listener, Arc::clone(&state))),
            tokio::spawn(accept_pushes(push_listener, Arc::clone(&state))),
        ];
        debug!(%session_addr, %push_addr, "Mock LogBroker listening");

        Ok(Self {
            session_addr,
            push_addr,
            state,
            acceptors,
        })
    }

    /// Host to hand to the client
    pub fn host(&self) -> String {
        self.session_addr.ip().to_string()
    }

    /// Connection config pointing at this server with short timeouts
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_ports(self.session_addr.port(), self.push_addr.port())
            .with_connect_timeout(Duration::from_secs(5))
            .with_reconnect_interval(Duration::from_millis(20))
    }

    /// Seqno announced in subsequent handshakes
    pub fn set_initial_seqno(&self, seqno: u64) {
        self.state.initial_seqno.store(seqno, Ordering::SeqCst);
    }

    /// Acknowledge every received chunk with its own seqno
    pub fn set_auto_ack(&self, enabled: bool) {
        self.state.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Answer the next `n` handshakes without a session header
    pub fn omit_session_header(&self, n: u32) {
        self.state.handshakes_without_session.store(n, Ordering::SeqCst);
    }

    /// Send a raw control frame payload on the latest session
    pub fn send_frame(&self, payload: impl Into<String>) -> bool {
        match self.latest_session() {
            Some(id) => self.state.send(&id, Command::Frame(payload.into())),
            None => false,
        }
    }

    pub fn ack(&self, seqno: u64) -> bool {
        self.send_frame(format!("ack seqno={seqno}"))
    }

    pub fn skip(&self, seqno: u64) -> bool {
        self.send_frame(format!("skip seqno={seqno}"))
    }

    pub fn ping(&self) -> bool {
        self.send_frame("ping")
    }

    /// Finish the latest session with a zero-length frame
    pub fn end_session(&self) -> bool {
        match self.latest_session() {
            Some(id) => self.state.send(&id, Command::End),
            None => false,
        }
    }

    /// Drop the latest session connection without a terminating frame
    pub fn drop_session(&self) -> bool {
        match self.latest_session() {
            Some(id) => self.state.send(&id, Command::Disconnect),
            None => false,
        }
    }

    pub fn latest_session(&self) -> Option<String> {
        self.state.latest_session.lock().clone()
    }

    /// Number of sessions issued so far
    pub fn session_count(&self) -> u64 {
        self.state.next_session.load(Ordering::SeqCst)
    }

    /// Request headers of every session handshake
    pub fn session_requests(&self) -> Vec<String> {
        self.state.session_requests.lock().clone()
    }

    /// Request headers of every push stream
    pub fn push_requests(&self) -> Vec<String> {
        self.state.push_requests.lock().clone()
    }

    /// Chunks received so far, in arrival order
    pub fn received_chunks(&self) -> Vec<Chunk> {
        self.state.received.lock().clone()
    }

    /// Wait until at least `count` chunks were received
    pub async fn wait_for_chunks(&self, count: usize, timeout: Duration) -> Vec<Chunk> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let chunks = self.received_chunks();
            if chunks.len() >= count || tokio::time::Instant::now() >= deadline {
                return chunks;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for MockLogBroker {
    fn drop(&mut self) {
        for acceptor in &self.acceptors {
            acceptor.abort();
        }
        for (_, tx) in self.state.sessions.lock().drain() {
            let _ = tx.send(Command::Disconnect);
        }
    }
}

async fn read_request(reader: &mut BufReader<TcpStream>) -> TransportResult<String> {
    let raw = read_until_delimiter(reader, HEADER_TERMINATOR, MAX_REQUEST_BYTES).await?;
    Ok(String::from_utf8_lossy(&raw).to_string())
}

async fn accept_sessions(listener: TcpListener, state: Arc<MockState>) {
    while let Ok((socket, _)) = listener.accept().await {
        tokio::spawn(serve_session(socket, Arc::clone(&state)));
    }
}

async fn accept_pushes(listener: TcpListener, state: Arc<MockState>) {
    while let Ok((socket, _)) = listener.accept().await {
        tokio::spawn(serve_push(socket, Arc::clone(&state)));
    }
}

async fn serve_session(socket: TcpStream, state: Arc<MockState>) -> TransportResult<()> {
    let mut reader = BufReader::new(socket);
    let request = read_request(&mut reader).await?;
    state.session_requests.lock().push(request);
    let mut socket = reader.into_inner();

    let omit = state
        .handshakes_without_session
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if omit {
        socket
            .write_all(b"HTTP/1.1 503 Service Unavailable\r\nRetry-After: 1\r\n\r\n")
            .await?;
        return Ok(());
    }

    let number = state.next_session.fetch_add(1, Ordering::SeqCst) + 1;
    let session_id = format!("mock-session-{number}");
    let seqno = state.initial_seqno.load(Ordering::SeqCst);
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.sessions.lock().insert(session_id.clone(), tx);
    *state.latest_session.lock() = Some(session_id.clone());

    socket
        .write_all(
            format!(
                "HTTP/1.1 200 OK\r\nSession: {session_id}\r\nSeqNo: {seqno}\r\n\
                 Transfer-Encoding: chunked\r\n\r\n"
            )
            .as_bytes(),
        )
        .await?;
    debug!(session = %session_id, seqno, "Mock session opened");

    let (mut read_half, mut write_half) = socket.into_split();
    let mut scratch = [0u8; 256];
    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Frame(payload)) => {
                    let frame = format!("{:X}\r\n{payload}\r\n", payload.len());
                    write_half.write_all(frame.as_bytes()).await?;
                }
                Some(Command::End) => {
                    write_half.write_all(b"0\r\n\r\n").await?;
                    break;
                }
                Some(Command::Disconnect) | None => break,
            },
            read = read_half.read(&mut scratch) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
        }
    }
    state.sessions.lock().remove(&session_id);
    debug!(session = %session_id, "Mock session closed");
    Ok(())
}

fn header_value<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    request.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

async fn serve_push(socket: TcpStream, state: Arc<MockState>) -> TransportResult<()> {
    let mut reader = BufReader::new(socket);
    let request = read_request(&mut reader).await?;
    let session_id = header_value(&request, "session").unwrap_or_default().to_string();
    state.push_requests.lock().push(request);

    loop {
        let line = match read_until_delimiter(&mut reader, CRLF, 4096).await {
            Ok(line) => line,
            Err(TransportError::StreamClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        let length = parse_frame_length(&String::from_utf8_lossy(&line))?;
        let mut frame = vec![0u8; length + CRLF.len()];
        reader.read_exact(&mut frame).await?;
        let chunk = Chunk::decode(&frame[..length])?;
        let seqno = chunk.header.seqno;
        trace!(session = %session_id, seqno, rows = chunk.rows.len(), "Mock received chunk");
        state.received.lock().push(chunk);

        if state.auto_ack.load(Ordering::SeqCst) {
            state.send(&session_id, Command::Frame(format!("ack seqno={seqno}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_value_lookup() {
        let request = "PUT /rt/store HTTP/1.1\r\nHost: x\r\nSession: abc\r\n\r\n";
        assert_eq!(header_value(request, "session"), Some("abc"));
        assert_eq!(header_value(request, "missing"), None);
    }
}
