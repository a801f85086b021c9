//! Remote document store client
//!
//! Talks to a docbridge server over TCP. Every TCP session is authenticated
//! with a HELLO before use; authenticated sessions are pooled and reused.
//!
//! ## Blocking and cancellation
//! - Connect, read and write timeouts are clamped to the cancel token's
//!   remaining time
//! - An explicit `cancel()` shuts down the socket of the in-flight call
//! - A session that saw any error is dropped instead of returned to the pool
//!
//! ## Stale sessions
//! A pooled session is checked before reuse; one the server has closed is
//! dropped. If a pooled session still fails because the peer went away, the
//! whole idle pool is cleared (a restarted server invalidates all of it) and
//! the command is sent once more on a freshly opened session.

use std::fs;
use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::batch::BatchOperation;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::document::{Document, DocumentKey};
use crate::error::{BridgeError, FailureKind, Result, StoreFailure, StoreResult};
use crate::protocol::{read_response, write_command, Command, Response};
use crate::query::QuerySpec;

use super::{Connector, DocumentStore};

/// Max authenticated sessions kept for reuse
const MAX_IDLE_SESSIONS: usize = 8;

/// One authenticated TCP session
struct Session {
    /// Session id assigned by the server
    id: u64,

    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,
}

impl Session {
    /// Send one command and wait for its response
    fn exchange(
        &mut self,
        command: &Command,
        timeouts: (Duration, Duration),
        cancel: &CancelToken,
    ) -> StoreResult<Response> {
        Ok(self.send(command, timeouts, cancel)?)
    }

    /// Like `exchange`, but reports whether the session turned out to be dead
    fn exchange_pooled(
        &mut self,
        command: &Command,
        timeouts: (Duration, Duration),
        cancel: &CancelToken,
    ) -> std::result::Result<Response, PooledError> {
        self.send(command, timeouts, cancel).map_err(|e| match e {
            BridgeError::Io(io) if is_stale(&io) => PooledError::Stale(io.into()),
            other => PooledError::Other(other.into()),
        })
    }

    fn send(
        &mut self,
        command: &Command,
        timeouts: (Duration, Duration),
        cancel: &CancelToken,
    ) -> Result<Response> {
        let (read_timeout, write_timeout) = timeouts;
        self.reader
            .get_ref()
            .set_read_timeout(Some(cancel.bound(read_timeout)))?;
        self.writer
            .get_ref()
            .set_write_timeout(Some(cancel.bound(write_timeout)))?;

        let interrupt = self.writer.get_ref().try_clone()?;
        let _hook = cancel.on_cancel(move || {
            let _ = interrupt.shutdown(Shutdown::Both);
        });

        write_command(&mut self.writer, command)?;
        read_response(&mut self.reader)
    }

    /// True if the server has not closed this idle session
    fn is_alive(&self) -> bool {
        // Buffered bytes on an idle session mean the stream is out of step
        if !self.reader.buffer().is_empty() {
            return false;
        }

        let stream = self.reader.get_ref();
        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut byte = [0u8; 1];
        let alive = match stream.peek(&mut byte) {
            // EOF, or an unsolicited frame
            Ok(_) => false,
            Err(e) => e.kind() == ErrorKind::WouldBlock,
        };
        stream.set_nonblocking(false).is_ok() && alive
    }
}

/// Failure of a command sent on a pooled session
enum PooledError {
    /// The server had already closed the session
    Stale(StoreFailure),
    Other(StoreFailure),
}

/// Kinds of I/O error that show a pooled session was already dead
fn is_stale(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}

/// Store client for a remote docbridge server
pub struct RemoteStore {
    endpoint: String,
    project_id: String,
    token: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    idle: Mutex<Vec<Session>>,
}

impl RemoteStore {
    /// Open and authenticate the first session
    pub fn connect(config: &Config, token: String, cancel: &CancelToken) -> Result<Self> {
        let store = Self {
            endpoint: config.endpoint.clone(),
            project_id: config.project_id.clone(),
            token,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            idle: Mutex::new(Vec::new()),
        };

        match store.open_session(cancel) {
            Ok(session) => {
                tracing::info!(
                    "Connected to {} for project {} (session {})",
                    store.endpoint,
                    store.project_id,
                    session.id
                );
                store.release(session);
                Ok(store)
            }
            Err(failure) => {
                cancel.check("connect")?;
                Err(BridgeError::Connection(format!(
                    "handshake with {} failed: {}",
                    store.endpoint, failure
                )))
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of pooled idle sessions
    pub fn idle_sessions(&self) -> usize {
        self.idle.lock().len()
    }

    fn timeouts(&self) -> (Duration, Duration) {
        (self.read_timeout, self.write_timeout)
    }

    fn open_session(&self, cancel: &CancelToken) -> StoreResult<Session> {
        let addrs = self.endpoint.to_socket_addrs().map_err(|e| {
            StoreFailure::invalid_request(format!("bad endpoint {}: {}", self.endpoint, e))
        })?;

        let mut last_error = StoreFailure::unavailable(format!(
            "no addresses resolved for {}",
            self.endpoint
        ));
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, cancel.bound(self.connect_timeout)) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = e.into(),
            }
        }
        let stream = stream.ok_or(last_error)?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let mut session = Session {
            id: 0,
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        };

        let hello = Command::Hello {
            project_id: self.project_id.clone(),
            token: self.token.clone(),
        };
        match session.exchange(&hello, self.timeouts(), cancel)? {
            Response::Welcome { session: id } => {
                session.id = id;
                tracing::debug!("Opened session {} to {}", id, self.endpoint);
                Ok(session)
            }
            Response::Failure(failure) => Err(failure),
            other => Err(unexpected("HELLO", &other)),
        }
    }

    fn release(&self, session: Session) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_SESSIONS {
            idle.push(session);
        }
    }

    /// Pop the most recent idle session that is still alive
    fn take_idle(&self) -> Option<Session> {
        let mut idle = self.idle.lock();
        while let Some(session) = idle.pop() {
            if session.is_alive() {
                return Some(session);
            }
            tracing::debug!("Dropping closed session {} to {}", session.id, self.endpoint);
        }
        None
    }

    fn clear_idle(&self) {
        let dropped = std::mem::take(&mut *self.idle.lock());
        if !dropped.is_empty() {
            tracing::warn!(
                "Discarding {} idle sessions to {} after a disconnect",
                dropped.len(),
                self.endpoint
            );
        }
    }

    /// Run one command on a pooled (or fresh) session
    fn call(&self, command: &Command, cancel: &CancelToken) -> StoreResult<Response> {
        let response = match self.take_idle() {
            Some(mut session) => match session.exchange_pooled(command, self.timeouts(), cancel) {
                Ok(response) => {
                    self.release(session);
                    response
                }
                Err(PooledError::Stale(failure)) => {
                    drop(session);
                    self.clear_idle();
                    if cancel.is_cancelled() {
                        return Err(failure);
                    }
                    tracing::warn!(
                        "Pooled session to {} was closed by the server ({}), reconnecting",
                        self.endpoint,
                        failure
                    );
                    self.call_fresh(command, cancel)?
                }
                Err(PooledError::Other(failure)) => return Err(failure),
            },
            None => self.call_fresh(command, cancel)?,
        };

        match response {
            Response::Failure(failure) => Err(failure),
            other => Ok(other),
        }
    }

    fn call_fresh(&self, command: &Command, cancel: &CancelToken) -> StoreResult<Response> {
        let mut session = self.open_session(cancel)?;
        let response = session.exchange(command, self.timeouts(), cancel)?;
        self.release(session);
        Ok(response)
    }
}

fn unexpected(what: &str, response: &Response) -> StoreFailure {
    StoreFailure::new(
        FailureKind::Unknown,
        format!("unexpected reply to {}: {:?}", what, response.status()),
    )
}

impl DocumentStore for RemoteStore {
    fn get(&self, key: &DocumentKey, cancel: &CancelToken) -> StoreResult<Option<Document>> {
        let command = Command::Get { key: key.clone() };
        match self.call(&command, cancel)? {
            Response::Document(doc) => Ok(doc),
            other => Err(unexpected("GET", &other)),
        }
    }

    fn query(&self, spec: &QuerySpec, cancel: &CancelToken) -> StoreResult<Vec<Document>> {
        let command = Command::Query { spec: spec.clone() };
        match self.call(&command, cancel)? {
            Response::Documents(docs) => Ok(docs),
            other => Err(unexpected("QUERY", &other)),
        }
    }

    fn commit(&self, operations: &[BatchOperation], cancel: &CancelToken) -> StoreResult<()> {
        let command = Command::Commit {
            operations: operations.to_vec(),
        };
        match self.call(&command, cancel)? {
            Response::Committed { count } if count as usize == operations.len() => Ok(()),
            Response::Committed { count } => Err(StoreFailure::new(
                FailureKind::Unknown,
                format!(
                    "server committed {} operations, expected {}",
                    count,
                    operations.len()
                ),
            )),
            other => Err(unexpected("COMMIT", &other)),
        }
    }

    fn ping(&self, cancel: &CancelToken) -> StoreResult<()> {
        match self.call(&Command::Ping, cancel)? {
            Response::Pong => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }
}

/// Connector that reads the access token and handshakes with the server
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteConnector;

impl RemoteConnector {
    /// Read the token from the credentials file
    pub fn read_token(config: &Config) -> Result<String> {
        let raw = fs::read_to_string(&config.credentials_path).map_err(|e| {
            BridgeError::Connection(format!(
                "cannot read credentials at {}: {}",
                config.credentials_path.display(),
                e
            ))
        })?;

        let token = raw.trim();
        if token.is_empty() {
            return Err(BridgeError::Connection(format!(
                "credentials at {} are empty",
                config.credentials_path.display()
            )));
        }
        Ok(token.to_string())
    }
}

impl Connector for RemoteConnector {
    fn connect(&self, config: &Config, cancel: &CancelToken) -> Result<Arc<dyn DocumentStore>> {
        let token = Self::read_token(config)?;
        let store = RemoteStore::connect(config, token, cancel)?;
        Ok(Arc::new(store))
    }
}
