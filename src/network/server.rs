//! TCP Server
//!
//! Accepts connections and hands each one to its own handler thread.

use std::fs;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::error::{BridgeError, FailureKind, Result};
use crate::protocol::{write_response, Response};
use crate::store::DocumentStore;

use super::connection::{Connection, ServerAuth};

/// Sleep between accept attempts when no client is waiting
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// TCP server exposing a document store
pub struct Server {
    config: Config,
    store: Arc<dyn DocumentStore>,
    auth: Arc<ServerAuth>,
    listener: Option<TcpListener>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    next_session: AtomicU64,
    handlers: Vec<JoinHandle<()>>,
}

/// Stops a running server from another thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

impl Server {
    /// Create a new server with the given config and store
    ///
    /// Reads the expected access token from `config.credentials_path`.
    pub fn new(config: Config, store: Arc<dyn DocumentStore>) -> Result<Self> {
        let raw = fs::read_to_string(&config.credentials_path).map_err(|e| {
            BridgeError::Configuration(format!(
                "cannot read credentials at {}: {}",
                config.credentials_path.display(),
                e
            ))
        })?;
        let token = raw.trim().to_string();
        if token.is_empty() {
            return Err(BridgeError::Configuration(format!(
                "credentials at {} are empty",
                config.credentials_path.display()
            )));
        }

        let auth = Arc::new(ServerAuth {
            project_id: config.project_id.clone(),
            token,
        });

        Ok(Self {
            config,
            store,
            auth,
            listener: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            next_session: AtomicU64::new(1),
            handlers: Vec::new(),
        })
    }

    /// Bind the listen address; returns the actual bound address
    pub fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }

        let listener = TcpListener::bind(&self.config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);

        tracing::info!("Listening on {}", addr);
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }

    /// Number of open client connections
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Start the server (blocking until shutdown)
    pub fn run(&mut self) -> Result<()> {
        self.bind()?;

        while !self.shutdown.load(Ordering::Relaxed) {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = self.dispatch(stream) {
                        tracing::warn!("Failed to start handler for {}: {}", peer, e);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }

            self.handlers.retain(|h| !h.is_finished());
        }

        tracing::info!("Shutting down, waiting for {} connections", self.handlers.len());
        for handler in self.handlers.drain(..) {
            let _ = handler.join();
        }
        self.listener = None;
        Ok(())
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Spawn a handler thread for an accepted stream
    fn dispatch(&mut self, stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(false)?;

        let open = self.active.load(Ordering::Relaxed);
        if open >= self.config.max_connections {
            tracing::warn!(
                "Rejecting connection: {} connections open (max {})",
                open,
                self.config.max_connections
            );
            let mut stream = stream;
            let _ = write_response(
                &mut stream,
                &Response::failure(FailureKind::Unavailable, "too many connections"),
            );
            return Ok(());
        }

        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let mut connection = Connection::new(
            stream,
            Arc::clone(&self.store),
            Arc::clone(&self.auth),
            Arc::clone(&self.shutdown),
            session_id,
        )?;
        connection.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms)?;

        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::Relaxed);

        let spawned = thread::Builder::new()
            .name(format!("docbridge-conn-{}", session_id))
            .spawn(move || {
                if let Err(e) = connection.handle() {
                    tracing::debug!("Connection {} ended with error: {}", connection.peer_addr(), e);
                }
                active.fetch_sub(1, Ordering::Relaxed);
            });

        match spawned {
            Ok(handle) => {
                self.handlers.push(handle);
                Ok(())
            }
            Err(e) => {
                self.active.fetch_sub(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }
}
