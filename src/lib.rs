//! # docbridge
//!
//! A resilient client access layer for remote document stores:
//! - One shared, lazily-initialized connection per process
//! - Reads and queries retried with bounded exponential backoff
//! - Write batches committed atomically on scope exit, discarded on failure
//! - Validated, composable queries
//! - Cancellation and deadlines observed at every blocking point
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Client                                │
//! │        get_document / query / batch / spawn_*                │
//! └───────┬──────────────────────┬──────────────────────┬───────┘
//!         │                      │                      │
//!         ▼                      ▼                      ▼
//!  ┌─────────────┐       ┌──────────────┐       ┌─────────────┐
//!  │ RetryPolicy │──────►│  classify()  │       │ BatchWriter │
//!  │  (backoff)  │       │ Transient /  │       │ (≤ max ops) │
//!  └──────┬──────┘       │  Terminal    │       └──────┬──────┘
//!         │              └──────────────┘              │
//!         ▼                                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ConnectionManager                           │
//! │              (init once, shared handle)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐       ┌─────────────┐
//!   │ MemoryStore │          │ RemoteStore │──TCP─►│   Server    │
//!   └─────────────┘          └─────────────┘       └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod cancel;
pub mod classify;
pub mod retry;
pub mod document;
pub mod query;
pub mod batch;
pub mod store;
pub mod connection;
pub mod dispatch;
pub mod client;
pub mod protocol;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BridgeError, FailureKind, Result, StoreFailure, StoreResult};
pub use config::{Collections, Config};
pub use cancel::CancelToken;
pub use classify::{classify, FailureClass};
pub use retry::{RetryPolicy, Sleeper};
pub use document::{fields, Document, DocumentKey, Fields, Value};
pub use query::{Direction, Documents, Operator, QueryBuilder, QueryFilter, QuerySpec};
pub use batch::{BatchOperation, BatchWriter};
pub use connection::{ConnectionHandle, ConnectionManager};
pub use client::Client;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of docbridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
