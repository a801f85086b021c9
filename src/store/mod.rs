//! Store Module
//!
//! The seam between the access layer and an actual document store.
//!
//! ## Responsibilities
//! - `DocumentStore`: the remote operations the access layer consumes
//!   (point read, query, atomic commit, liveness)
//! - `Connector`: the one-time handshake that produces a store client
//!
//! Implementations report raw `StoreFailure`s; retrying and wrapping them
//! into `BridgeError` is the access layer's job.
//!
//! ## Implementations
//! - `MemoryStore`: in-process, used by tests and the development server
//! - `RemoteStore`: TCP client for a server speaking the docbridge protocol

use std::sync::Arc;

use crate::batch::BatchOperation;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::document::{Document, DocumentKey};
use crate::error::{Result, StoreResult};
use crate::query::QuerySpec;

mod memory;
mod remote;

pub use memory::{MemoryConnector, MemoryStore};
pub use remote::{RemoteConnector, RemoteStore};

/// Operations consumed from a document store
pub trait DocumentStore: Send + Sync {
    /// Read one document, `None` if it doesn't exist
    fn get(&self, key: &DocumentKey, cancel: &CancelToken) -> StoreResult<Option<Document>>;

    /// Run a query, returning documents in result order
    fn query(&self, spec: &QuerySpec, cancel: &CancelToken) -> StoreResult<Vec<Document>>;

    /// Apply all operations in order, atomically: all or none
    fn commit(&self, operations: &[BatchOperation], cancel: &CancelToken) -> StoreResult<()>;

    /// Liveness check
    fn ping(&self, _cancel: &CancelToken) -> StoreResult<()> {
        Ok(())
    }
}

/// Produces an initialized store client
pub trait Connector: Send + Sync {
    /// Authenticate and return a ready store
    ///
    /// Must either fully succeed or fail; never hand back a store that
    /// still needs setting up.
    fn connect(&self, config: &Config, cancel: &CancelToken) -> Result<Arc<dyn DocumentStore>>;
}
