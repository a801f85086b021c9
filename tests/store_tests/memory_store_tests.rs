//! Memory Store Tests
//!
//! These tests verify:
//! - Get/query return snapshots in natural (id) order
//! - Commits apply every operation or none
//! - Update merges into an existing document and fails on a missing one
//! - Concurrent readers never observe half a batch

use std::sync::Arc;
use std::thread;

use docbridge::store::{Connector, DocumentStore, MemoryConnector, MemoryStore};
use docbridge::{
    fields, BatchOperation, CancelToken, Config, DocumentKey, FailureKind, QueryBuilder, Value,
};

fn key(id: &str) -> DocumentKey {
    DocumentKey::new("modules", id)
}

fn set(id: &str, n: i64) -> BatchOperation {
    BatchOperation::Set {
        key: key(id),
        fields: fields([("n", n)]),
    }
}

#[test]
fn test_get_missing_is_none() {
    let store = MemoryStore::new();
    let cancel = CancelToken::new();
    assert!(store.get(&key("nope"), &cancel).unwrap().is_none());
    assert!(store.is_empty());
}

#[test]
fn test_insert_and_get() {
    let store = MemoryStore::new();
    store.insert(key("m1"), fields([("domain", "apis")]));

    let doc = store.get(&key("m1"), &CancelToken::new()).unwrap().unwrap();
    assert_eq!(doc.collection(), "modules");
    assert_eq!(doc.get("domain"), Some(&Value::from("apis")));
    assert_eq!(store.len("modules"), 1);
    assert_eq!(store.len("other"), 0);
}

#[test]
fn test_query_natural_order_is_by_id() {
    let store = MemoryStore::new();
    for id in ["c", "a", "b"] {
        store.insert(key(id), fields([("domain", "apis")]));
    }

    let spec = QueryBuilder::new("modules").build().unwrap();
    let docs = store.query(&spec, &CancelToken::new()).unwrap();
    let ids: Vec<&str> = docs.iter().map(|d| d.id()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[test]
fn test_commit_applies_in_order() {
    let store = MemoryStore::new();
    let cancel = CancelToken::new();

    store
        .commit(
            &[
                set("a", 1),
                BatchOperation::Update {
                    key: key("a"),
                    fields: fields([("extra", true)]),
                },
                set("b", 2),
                BatchOperation::Delete { key: key("b") },
            ],
            &cancel,
        )
        .unwrap();

    let a = store.get(&key("a"), &cancel).unwrap().unwrap();
    assert_eq!(a.get("n"), Some(&Value::Int(1)));
    assert_eq!(a.get("extra"), Some(&Value::Bool(true)));
    assert!(store.get(&key("b"), &cancel).unwrap().is_none());
}

#[test]
fn test_set_replaces_whole_document() {
    let store = MemoryStore::new();
    let cancel = CancelToken::new();
    store.insert(key("a"), fields([("old", 1), ("n", 0)]));

    store.commit(&[set("a", 5)], &cancel).unwrap();

    let a = store.get(&key("a"), &cancel).unwrap().unwrap();
    assert_eq!(a.fields().len(), 1);
    assert_eq!(a.get("n"), Some(&Value::Int(5)));
}

#[test]
fn test_update_of_missing_document_fails_whole_batch() {
    let store = MemoryStore::new();
    let cancel = CancelToken::new();

    let failure = store
        .commit(
            &[
                set("a", 1),
                BatchOperation::Update {
                    key: key("ghost"),
                    fields: fields([("n", 2)]),
                },
            ],
            &cancel,
        )
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::NotFound);
    assert!(failure.message.contains("modules/ghost"));
    assert!(store.is_empty());
}

#[test]
fn test_delete_missing_is_noop() {
    let store = MemoryStore::new();
    store
        .commit(&[BatchOperation::Delete { key: key("x") }], &CancelToken::new())
        .unwrap();
    assert!(store.is_empty());
}

#[test]
fn test_commit_spans_collections() {
    let store = MemoryStore::new();
    store
        .commit(
            &[
                set("a", 1),
                BatchOperation::Set {
                    key: DocumentKey::new("integrated_systems", "crm"),
                    fields: fields([("vendor", "acme")]),
                },
            ],
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(store.len("modules"), 1);
    assert_eq!(store.len("integrated_systems"), 1);
    assert_eq!(store.snapshot("integrated_systems")[0].id(), "crm");
}

#[test]
fn test_readers_never_see_partial_batch() {
    let store = Arc::new(MemoryStore::new());
    let batch: Vec<BatchOperation> = (0..50).map(|i| set(&format!("m{:02}", i), i)).collect();

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..200 {
                let seen = store.len("modules");
                assert!(seen == 0 || seen == 50, "saw {} documents", seen);
            }
        })
    };

    store.commit(&batch, &CancelToken::new()).unwrap();
    reader.join().unwrap();
    assert_eq!(store.len("modules"), 50);
}

#[test]
fn test_connector_shares_one_store() {
    let store = Arc::new(MemoryStore::new());
    let connector = MemoryConnector::new(Arc::clone(&store));
    let config = Config::default();
    let cancel = CancelToken::new();

    let a = connector.connect(&config, &cancel).unwrap();
    let b = connector.connect(&config, &cancel).unwrap();
    a.commit(&[set("shared", 1)], &cancel).unwrap();

    assert!(b.get(&key("shared"), &cancel).unwrap().is_some());
    assert_eq!(store.len("modules"), 1);
    assert_eq!(connector.connects(), 2);
}

#[test]
fn test_connector_respects_cancellation() {
    let connector = MemoryConnector::default();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = connector.connect(&Config::default(), &cancel).err().unwrap();
    assert!(err.is_cancelled());
    assert_eq!(connector.connects(), 0);
}
