//! In-memory document store
//!
//! Collections are `BTreeMap`s keyed by document id, so the natural result
//! order of a query is ascending id.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::batch::BatchOperation;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::document::{Document, DocumentKey, Fields};
use crate::error::{Result, StoreFailure, StoreResult};
use crate::query::QuerySpec;

use super::{Connector, DocumentStore};

type Collection = BTreeMap<String, Fields>;

/// Thread-safe in-memory store
///
/// ## Concurrency:
/// - Reads take the read lock and copy documents out (snapshot semantics)
/// - Commits take the write lock for the whole batch, so no reader ever
///   sees half a batch
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a document directly, bypassing batches (seeding and tests)
    pub fn insert(&self, key: DocumentKey, fields: Fields) {
        self.collections
            .write()
            .entry(key.collection().to_string())
            .or_default()
            .insert(key.id().to_string(), fields);
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.collections.read().values().all(|c| c.is_empty())
    }

    /// All documents of a collection in natural order
    pub fn snapshot(&self, collection: &str) -> Vec<Document> {
        let collections = self.collections.read();
        collections
            .get(collection)
            .map(|docs| to_documents(collection, docs))
            .unwrap_or_default()
    }
}

fn to_documents(collection: &str, docs: &Collection) -> Vec<Document> {
    docs.iter()
        .map(|(id, fields)| Document::new(DocumentKey::new(collection, id.clone()), fields.clone()))
        .collect()
}

impl DocumentStore for MemoryStore {
    fn get(&self, key: &DocumentKey, _cancel: &CancelToken) -> StoreResult<Option<Document>> {
        let collections = self.collections.read();
        Ok(collections
            .get(key.collection())
            .and_then(|docs| docs.get(key.id()))
            .map(|fields| Document::new(key.clone(), fields.clone())))
    }

    fn query(&self, spec: &QuerySpec, _cancel: &CancelToken) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read();
        let docs = match collections.get(spec.collection()) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };

        Ok(spec.evaluate(to_documents(spec.collection(), docs)))
    }

    fn commit(&self, operations: &[BatchOperation], _cancel: &CancelToken) -> StoreResult<()> {
        let mut collections = self.collections.write();

        // Stage every touched collection; publish only if all operations apply
        let mut staged: BTreeMap<String, Collection> = BTreeMap::new();

        for operation in operations {
            let key = operation.key();
            let docs = staged
                .entry(key.collection().to_string())
                .or_insert_with(|| {
                    collections
                        .get(key.collection())
                        .cloned()
                        .unwrap_or_default()
                });

            match operation {
                BatchOperation::Set { fields, .. } => {
                    docs.insert(key.id().to_string(), fields.clone());
                }
                BatchOperation::Update { fields, .. } => match docs.get_mut(key.id()) {
                    Some(existing) => {
                        existing.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    None => {
                        return Err(StoreFailure::not_found(format!(
                            "cannot update missing document {}",
                            key
                        )));
                    }
                },
                BatchOperation::Delete { .. } => {
                    docs.remove(key.id());
                }
            }
        }

        collections.extend(staged);
        Ok(())
    }
}

/// Connector handing out one shared `MemoryStore`
#[derive(Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// How many times `connect` has run
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, config: &Config, cancel: &CancelToken) -> Result<Arc<dyn DocumentStore>> {
        cancel.check("connect")?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Connected to in-memory store for project {}", config.project_id);
        Ok(Arc::clone(&self.store) as Arc<dyn DocumentStore>)
    }
}
