//! Batch Writer
//!
//! Buffers write operations and commits them in one atomic store call.
//!
//! ## Lifecycle
//! ```text
//!   Client::batch_writer() ──► set / update / delete (buffered, ≤ max_batch_size)
//!                                   │
//!                 ┌─────────────────┼──────────────────┐
//!                 ▼                 ▼                  ▼
//!             commit()          discard()        dropped unfinished
//!         (one store call,     (nothing sent)     (nothing sent,
//!          skipped if empty)                        logged)
//! ```
//!
//! The buffer length is the operation count: there is no separate counter
//! that could disagree with what would actually be committed.

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::connection::ConnectionHandle;
use crate::document::{DocumentKey, Fields};
use crate::error::{BridgeError, Result};

/// A buffered write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchOperation {
    /// Create or overwrite the whole document
    Set { key: DocumentKey, fields: Fields },

    /// Merge fields into an existing document
    Update { key: DocumentKey, fields: Fields },

    /// Remove the document (no-op if absent)
    Delete { key: DocumentKey },
}

impl BatchOperation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            BatchOperation::Set { key, .. }
            | BatchOperation::Update { key, .. }
            | BatchOperation::Delete { key } => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BatchOperation::Set { .. } => "set",
            BatchOperation::Update { .. } => "update",
            BatchOperation::Delete { .. } => "delete",
        }
    }

    fn validate(&self) -> Result<()> {
        let key = self.key();
        if key.collection().trim().is_empty() {
            return Err(BridgeError::Configuration(format!(
                "{}: collection name must not be empty",
                self.kind()
            )));
        }
        if key.id().trim().is_empty() || key.id().contains('/') {
            return Err(BridgeError::Configuration(format!(
                "{}: invalid document id '{}'",
                self.kind(),
                key.id()
            )));
        }
        if let BatchOperation::Update { fields, .. } = self {
            if fields.is_empty() {
                return Err(BridgeError::Configuration(format!(
                    "update of {} has no fields",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// A scope of buffered writes bound to one connection handle
pub struct BatchWriter {
    handle: ConnectionHandle,
    operations: Vec<BatchOperation>,
    max_batch_size: usize,
    cancel: CancelToken,
    finished: bool,
}

impl BatchWriter {
    pub fn new(handle: ConnectionHandle, max_batch_size: usize, cancel: CancelToken) -> Self {
        Self {
            handle,
            operations: Vec::new(),
            max_batch_size,
            cancel,
            finished: false,
        }
    }

    /// Buffer a full-document write
    pub fn set(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        fields: Fields,
    ) -> Result<&mut Self> {
        self.push(BatchOperation::Set {
            key: DocumentKey::new(collection, id),
            fields,
        })
    }

    /// Buffer a partial update
    pub fn update(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        fields: Fields,
    ) -> Result<&mut Self> {
        self.push(BatchOperation::Update {
            key: DocumentKey::new(collection, id),
            fields,
        })
    }

    /// Buffer a delete
    pub fn delete(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
    ) -> Result<&mut Self> {
        self.push(BatchOperation::Delete {
            key: DocumentKey::new(collection, id),
        })
    }

    /// Buffer an operation
    ///
    /// Rejects invalid operations and overflow without touching the buffer.
    pub fn push(&mut self, operation: BatchOperation) -> Result<&mut Self> {
        operation.validate()?;

        if self.operations.len() >= self.max_batch_size {
            return Err(BridgeError::Configuration(format!(
                "batch is full: {} operations (max_batch_size = {})",
                self.operations.len(),
                self.max_batch_size
            )));
        }

        self.operations.push(operation);
        Ok(self)
    }

    /// Number of buffered operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    /// Apply every buffered operation atomically
    ///
    /// Returns the number committed. An empty batch makes no store call.
    /// Failures are not retried since writes aren't assumed idempotent.
    pub fn commit(mut self) -> Result<usize> {
        self.finished = true;
        let operations = std::mem::take(&mut self.operations);
        let count = operations.len();

        if count == 0 {
            tracing::debug!("Batch closed with no operations, nothing to commit");
            return Ok(0);
        }

        self.cancel.check("batch commit")?;

        match self.handle.store().commit(&operations, &self.cancel) {
            Ok(()) => {
                tracing::debug!("Committed batch with {} operations", count);
                Ok(count)
            }
            Err(cause) => {
                self.cancel.check("batch commit")?;
                tracing::error!("Batch commit of {} operations failed: {}", count, cause);
                Err(BridgeError::Write {
                    operations: count,
                    cause,
                })
            }
        }
    }

    /// Drop every buffered operation without sending anything
    pub fn discard(mut self) -> usize {
        self.finished = true;
        let count = self.operations.len();
        self.operations.clear();
        if count > 0 {
            tracing::debug!("Discarded batch with {} operations", count);
        }
        count
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        if !self.finished && !self.operations.is_empty() {
            tracing::warn!(
                "Batch dropped without commit, discarding {} operations",
                self.operations.len()
            );
        }
    }
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("operations", &self.operations.len())
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}
