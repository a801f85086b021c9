//! Connection Manager
//!
//! Owns the single lazily-created handle to the store.
//!
//! ## Lifecycle
//! ```text
//!   Empty ──get_handle──► Initializing ──ok──► Ready(handle) ──reset──► Empty
//!     ▲                        │
//!     │                        ├──error──► Failed (reported to the initializer
//!     │                        │           and every caller waiting on it;
//!     │                        │           the next caller starts over)
//!     └────────cancelled───────┘
//! ```
//!
//! ## Concurrency
//! - Exactly one caller runs the connector per initialization; the rest wait
//!   on a condvar and receive the same handle or the same failure
//! - The connector runs without the slot lock held
//! - `reset()` waits for any in-flight initialization before clearing. Handles
//!   already handed out stay valid; only new callers get a new connection
//! - A cancelled initializer leaves the slot `Empty` and wakes the waiters,
//!   one of which takes over

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::store::{Connector, DocumentStore};

/// How often waiters re-check their cancel token
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Shared reference to an initialized store client
#[derive(Clone)]
pub struct ConnectionHandle {
    store: Arc<dyn DocumentStore>,
    generation: u64,
}

impl ConnectionHandle {
    /// Wrap a store directly (tests and custom wiring)
    pub fn from_store(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            generation: 0,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Which initialization produced this handle (1 for the first)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if both handles refer to the same store client
    pub fn same_as(&self, other: &ConnectionHandle) -> bool {
        Arc::as_ptr(&self.store) as *const () == Arc::as_ptr(&other.store) as *const ()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("generation", &self.generation)
            .finish()
    }
}

enum Slot {
    Empty,
    Initializing { generation: u64 },
    Ready(ConnectionHandle),
}

struct State {
    slot: Slot,

    /// Most recent failed initialization, kept for callers that waited on it
    last_failure: Option<(u64, String)>,
}

/// Hands out the shared connection handle, creating it on first use
pub struct ConnectionManager {
    config: Config,
    connector: Arc<dyn Connector>,
    state: Mutex<State>,
    changed: Condvar,
    initializations: AtomicU64,
}

impl ConnectionManager {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            state: Mutex::new(State {
                slot: Slot::Empty,
                last_failure: None,
            }),
            changed: Condvar::new(),
            initializations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the shared handle, connecting on first call
    pub fn get_handle(&self) -> Result<ConnectionHandle> {
        self.get_handle_with(&CancelToken::new())
    }

    /// Get the shared handle, giving up with `Cancelled` if `cancel` fires
    /// while connecting or waiting on another caller's connect
    pub fn get_handle_with(&self, cancel: &CancelToken) -> Result<ConnectionHandle> {
        let mut state = self.state.lock();
        let mut waited_on: Option<u64> = None;

        loop {
            if let (Some(waited), Some((failed, message))) = (waited_on, &state.last_failure) {
                if waited == *failed {
                    return Err(BridgeError::Connection(message.clone()));
                }
            }

            let in_flight = match &state.slot {
                Slot::Ready(handle) => return Ok(handle.clone()),
                Slot::Initializing { generation } => Some(*generation),
                Slot::Empty => None,
            };

            match in_flight {
                Some(generation) => {
                    waited_on = Some(generation);
                    cancel.check("waiting for connection")?;
                    self.changed.wait_for(&mut state, WAIT_SLICE);
                }
                None => return self.initialize(state, cancel),
            }
        }
    }

    /// Run the connector as the single initializer
    fn initialize(
        &self,
        mut state: MutexGuard<'_, State>,
        cancel: &CancelToken,
    ) -> Result<ConnectionHandle> {
        let generation = self.initializations.fetch_add(1, Ordering::SeqCst) + 1;
        state.slot = Slot::Initializing { generation };

        tracing::debug!(
            "Initializing connection for project {} (generation {})",
            self.config.project_id,
            generation
        );

        let outcome = MutexGuard::unlocked(&mut state, || {
            panic::catch_unwind(AssertUnwindSafe(|| {
                self.connector.connect(&self.config, cancel)
            }))
        });

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                state.slot = Slot::Empty;
                state.last_failure = Some((generation, "connector panicked".to_string()));
                drop(state);
                self.changed.notify_all();
                panic::resume_unwind(payload);
            }
        };

        let result = match outcome {
            Ok(store) => {
                let handle = ConnectionHandle { store, generation };
                state.slot = Slot::Ready(handle.clone());
                state.last_failure = None;
                tracing::info!(
                    "Connection initialized for project {}",
                    self.config.project_id
                );
                Ok(handle)
            }
            Err(BridgeError::Cancelled(msg)) => {
                state.slot = Slot::Empty;
                tracing::debug!("Connection initialization cancelled: {}", msg);
                Err(BridgeError::Cancelled(msg))
            }
            Err(e) => {
                let message = match e {
                    BridgeError::Connection(msg) => msg,
                    other => other.to_string(),
                };
                tracing::error!("Connection initialization failed: {}", message);
                state.slot = Slot::Empty;
                state.last_failure = Some((generation, message.clone()));
                Err(BridgeError::Connection(message))
            }
        };

        drop(state);
        self.changed.notify_all();
        result
    }

    /// Drop the cached handle so the next caller reconnects
    ///
    /// Waits for an in-flight initialization first. Returns whether a handle
    /// was cached.
    pub fn reset(&self) -> bool {
        let mut state = self.state.lock();
        while matches!(state.slot, Slot::Initializing { .. }) {
            self.changed.wait(&mut state);
        }

        let had_handle = matches!(state.slot, Slot::Ready(_));
        state.slot = Slot::Empty;
        state.last_failure = None;
        drop(state);

        if had_handle {
            tracing::info!("Connection reset for project {}", self.config.project_id);
        }
        had_handle
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Ready(_))
    }

    /// Number of initializations started so far
    pub fn initialization_count(&self) -> u64 {
        self.initializations.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Process-wide instance
// =============================================================================

static GLOBAL: OnceLock<Arc<ConnectionManager>> = OnceLock::new();

/// Install the process-wide manager; fails if one is already installed
pub fn install_global(manager: Arc<ConnectionManager>) -> Result<Arc<ConnectionManager>> {
    GLOBAL.set(Arc::clone(&manager)).map_err(|_| {
        BridgeError::Configuration("a global connection manager is already installed".to_string())
    })?;
    Ok(manager)
}

/// The process-wide manager, if one was installed
pub fn global() -> Option<Arc<ConnectionManager>> {
    GLOBAL.get().cloned()
}
