//! Client
//!
//! The access layer callers use: reads and queries run through the shared
//! connection and the retry policy; writes go through batch scopes.
//!
//! ## Responsibilities
//! - Resolve the handle from `ConnectionManager` on every call
//! - Wrap every read in `RetryPolicy`
//! - Open batch scopes that commit on success and discard on failure
//! - Offload reads to the `ReadPool` on request
//!
//! `Client` is cheap to clone and shares everything except its cancel token,
//! which `with_cancellation` replaces.

use std::sync::Arc;

use crate::batch::BatchWriter;
use crate::cancel::CancelToken;
use crate::config::{Collections, Config};
use crate::connection::ConnectionManager;
use crate::dispatch::{Pending, ReadPool};
use crate::document::{Document, DocumentKey};
use crate::error::{BridgeError, Result};
use crate::query::{Documents, QueryBuilder, QueryFilter, QuerySpec};
use crate::retry::RetryPolicy;
use crate::store::RemoteConnector;

/// Read path shared by the client and its pool jobs
///
/// Holds no reference to the pool, so a job never keeps the pool alive.
#[derive(Clone)]
struct Reader {
    manager: Arc<ConnectionManager>,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl Reader {
    fn get_document(&self, key: &DocumentKey) -> Result<Option<Document>> {
        let handle = self.manager.get_handle_with(&self.cancel)?;
        let target = key.to_string();
        self.retry
            .run(&target, &self.cancel, |_| handle.store().get(key, &self.cancel))
    }

    fn query(&self, spec: &QuerySpec) -> Result<Documents> {
        let handle = self.manager.get_handle_with(&self.cancel)?;
        let target = format!("query {}", spec);
        let docs = self
            .retry
            .run(&target, &self.cancel, |_| handle.store().query(spec, &self.cancel))?;

        tracing::debug!("{} returned {} documents", target, docs.len());
        Ok(Documents::from_snapshot(docs))
    }

    /// A copy that also stops when `shutdown` fires
    fn following(&self, shutdown: &CancelToken) -> Reader {
        let cancel = self.cancel.child();
        cancel.follow(shutdown);
        Reader {
            cancel,
            ..self.clone()
        }
    }

    fn ping(&self) -> Result<()> {
        let handle = self.manager.get_handle_with(&self.cancel)?;
        self.retry
            .run("ping", &self.cancel, |_| handle.store().ping(&self.cancel))
    }
}

/// Resilient document store client
#[derive(Clone)]
pub struct Client {
    reader: Reader,
    pool: Arc<ReadPool>,
    max_batch_size: usize,
    default_query_limit: usize,
    collections: Collections,
}

impl Client {
    /// Build a client on top of a connection manager
    ///
    /// Limits and the retry schedule come from the manager's config.
    pub fn new(manager: Arc<ConnectionManager>) -> Result<Self> {
        let config = manager.config().clone();
        let pool = ReadPool::new(config.read_workers)?;

        Ok(Self {
            reader: Reader {
                retry: RetryPolicy::from_config(&config),
                manager,
                cancel: CancelToken::new(),
            },
            pool: Arc::new(pool),
            max_batch_size: config.max_batch_size,
            default_query_limit: config.default_query_limit,
            collections: config.collections,
        })
    }

    /// Validate `config` and build a client for a remote server
    ///
    /// The connection itself is made lazily on first use.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let manager = ConnectionManager::new(config, Arc::new(RemoteConnector));
        Self::new(Arc::new(manager))
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.reader.retry = retry;
        self
    }

    /// A clone whose operations observe `cancel`
    pub fn with_cancellation(&self, cancel: CancelToken) -> Self {
        let mut client = self.clone();
        client.reader.cancel = cancel;
        client
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.reader.cancel
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.reader.manager
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.reader.retry
    }

    pub fn collections(&self) -> &Collections {
        &self.collections
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read one document, retrying transient failures
    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let key = checked_key(collection, id)?;
        self.reader.get_document(&key)
    }

    /// Start a query on `collection` with the configured default limit
    pub fn query_builder(&self, collection: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(collection).limit(self.default_query_limit)
    }

    /// Run a query, retrying transient failures
    pub fn query(&self, spec: &QuerySpec) -> Result<Documents> {
        self.reader.query(spec)
    }

    /// Run ANDed filters against a collection
    ///
    /// `limit` falls back to the configured default.
    pub fn query_collection<I>(
        &self,
        collection: &str,
        filters: I,
        limit: Option<usize>,
    ) -> Result<Documents>
    where
        I: IntoIterator<Item = QueryFilter>,
    {
        let spec = QueryBuilder::new(collection)
            .with_filters(filters)
            .limit(limit.unwrap_or(self.default_query_limit))
            .build()?;
        self.query(&spec)
    }

    /// Round-trip to the store, retrying transient failures
    pub fn ping(&self) -> Result<()> {
        self.reader.ping()
    }

    /// `get_document` on a read worker
    pub fn spawn_get(&self, collection: &str, id: &str) -> Pending<Option<Document>> {
        let reader = self.reader.clone();
        let key = checked_key(collection, id);
        self.pool
            .submit(move |shutdown| reader.following(shutdown).get_document(&key?))
    }

    /// `query` on a read worker
    pub fn spawn_query(&self, spec: QuerySpec) -> Pending<Documents> {
        let reader = self.reader.clone();
        self.pool
            .submit(move |shutdown| reader.following(shutdown).query(&spec))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Open a batch bound to the shared handle
    ///
    /// The caller must `commit()` or `discard()`; dropping discards.
    pub fn batch_writer(&self) -> Result<BatchWriter> {
        let handle = self.reader.manager.get_handle_with(&self.reader.cancel)?;
        Ok(BatchWriter::new(
            handle,
            self.max_batch_size,
            self.reader.cancel.clone(),
        ))
    }

    /// Run `scope` against a fresh batch
    ///
    /// If `scope` returns `Ok`, everything it buffered is committed in one
    /// call (no call at all if it buffered nothing). If it returns `Err` or
    /// panics, nothing is committed and the error propagates.
    pub fn batch<T, E, F>(&self, scope: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut BatchWriter) -> std::result::Result<T, E>,
        E: From<BridgeError>,
    {
        let mut writer = self.batch_writer()?;

        match scope(&mut writer) {
            Ok(value) => {
                writer.commit()?;
                Ok(value)
            }
            Err(e) => {
                let discarded = writer.discard();
                tracing::error!(
                    "Batch operation failed, discarded {} buffered operations",
                    discarded
                );
                Err(e)
            }
        }
    }
}

fn checked_key(collection: &str, id: &str) -> Result<DocumentKey> {
    if collection.trim().is_empty() || id.trim().is_empty() {
        return Err(BridgeError::Configuration(format!(
            "invalid document reference '{}/{}'",
            collection, id
        )));
    }
    Ok(DocumentKey::new(collection, id))
}
