//! Connection Handler
//!
//! Handles individual client connections on the server side.
//!
//! ## Session flow
//! 1. The first command must be HELLO with the right project id and token,
//!    otherwise the server answers PERMISSION_DENIED and closes
//! 2. Every later command runs against the store and gets exactly one reply
//! 3. Idle sessions stay open; the handler polls for readability so it can
//!    notice a server shutdown without consuming partial frames

use std::io::{BufRead, BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{BridgeError, FailureKind, Result};
use crate::protocol::{read_command, write_response, Command, Response};
use crate::store::DocumentStore;

/// Interval at which idle sessions check for shutdown
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Expected handshake values
#[derive(Debug, Clone)]
pub struct ServerAuth {
    pub project_id: String,
    pub token: String,
}

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Store served to this client
    store: Arc<dyn DocumentStore>,

    auth: Arc<ServerAuth>,

    /// Set when the server is shutting down
    shutdown: Arc<AtomicBool>,

    /// Session id handed out on a successful handshake
    session_id: u64,

    /// Read timeout once a request has started arriving
    read_timeout: Duration,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O
    pub fn new(
        stream: TcpStream,
        store: Arc<dyn DocumentStore>,
        auth: Arc<ServerAuth>,
        shutdown: Arc<AtomicBool>,
        session_id: u64,
    ) -> Result<Self> {
        // Get peer address for logging before we split the stream
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            store,
            auth,
            shutdown,
            session_id,
            read_timeout: Duration::from_millis(5000),
            peer_addr,
        })
    }

    /// Configure connection timeouts
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.read_timeout = Duration::from_millis(read_ms);
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Returns when the client disconnects, the handshake fails, the server
    /// shuts down, or an error occurs.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        if !self.handshake()? {
            return Ok(());
        }

        loop {
            if !self.wait_for_request()? {
                tracing::debug!("Client {} disconnected", self.peer_addr);
                return Ok(());
            }

            let command = match read_command(&mut self.reader) {
                Ok(cmd) => cmd,
                Err(BridgeError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    // Send error response if possible
                    let _ = self.send_response(Response::failure(
                        FailureKind::InvalidRequest,
                        e.to_string(),
                    ));
                    return Err(e);
                }
            };

            tracing::trace!(
                "Received {:?} from {} (session {})",
                command.command_type(),
                self.peer_addr,
                self.session_id
            );

            let response = self.execute_command(command);

            if let Err(e) = self.send_response(response) {
                // If the client disconnected before we could send the response,
                // log and exit gracefully rather than treating it as a server error.
                if let BridgeError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) {
                        tracing::debug!(
                            "Client {} disconnected before response could be sent: {}",
                            self.peer_addr,
                            e
                        );
                        return Ok(());
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Check the HELLO; returns false if the session was refused
    fn handshake(&mut self) -> Result<bool> {
        if !self.wait_for_request()? {
            return Ok(false);
        }

        let refusal = match read_command(&mut self.reader)? {
            Command::Hello { project_id, token } => {
                if project_id != self.auth.project_id {
                    Some(format!("unknown project '{}'", project_id))
                } else if token != self.auth.token {
                    Some("invalid access token".to_string())
                } else {
                    None
                }
            }
            other => Some(format!(
                "expected HELLO, got {:?}",
                other.command_type()
            )),
        };

        match refusal {
            None => {
                self.send_response(Response::Welcome {
                    session: self.session_id,
                })?;
                tracing::debug!(
                    "Session {} authenticated for {}",
                    self.session_id,
                    self.peer_addr
                );
                Ok(true)
            }
            Some(reason) => {
                tracing::warn!("Refused session from {}: {}", self.peer_addr, reason);
                let _ = self.send_response(Response::failure(FailureKind::PermissionDenied, reason));
                Ok(false)
            }
        }
    }

    /// Block until a request starts arriving
    ///
    /// Peeks instead of reading so a poll timeout never splits a frame.
    /// Returns false on clean disconnect or server shutdown.
    fn wait_for_request(&mut self) -> Result<bool> {
        let mut byte = [0u8; 1];

        loop {
            if !self.reader.buffer().is_empty() {
                return Ok(true);
            }
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(false);
            }

            let stream = self.reader.get_ref();
            stream.set_read_timeout(Some(IDLE_POLL))?;

            match stream.peek(&mut byte) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    // Pull the available bytes into the buffer
                    self.reader.fill_buf()?;
                    return Ok(true);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(e) if is_disconnect(e.kind()) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Execute a command and return a response
    fn execute_command(&self, command: Command) -> Response {
        let cancel = CancelToken::new();

        let outcome = match command {
            Command::Get { key } => self.store.get(&key, &cancel).map(Response::Document),
            Command::Query { spec } => self.store.query(&spec, &cancel).map(Response::Documents),
            Command::Commit { operations } => self
                .store
                .commit(&operations, &cancel)
                .map(|()| Response::Committed {
                    count: operations.len() as u64,
                }),
            Command::Ping => self.store.ping(&cancel).map(|()| Response::Pong),
            Command::Hello { .. } => {
                return Response::failure(
                    FailureKind::InvalidRequest,
                    "session is already authenticated",
                )
            }
        };

        outcome.unwrap_or_else(Response::Failure)
    }

    /// Send a response to the client
    fn send_response(&mut self, response: Response) -> Result<()> {
        write_response(&mut self.writer, &response)?;
        Ok(())
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn is_disconnect(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
    )
}
