//! Connection Manager Tests
//!
//! These tests verify:
//! - Concurrent first callers trigger exactly one initialization
//! - Every caller receives the same handle
//! - Failed initializations reach every waiter and are retried by the next caller
//! - Reset, cancellation, and the process-wide instance

#[path = "../common/mod.rs"]
mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::{test_config, ScriptedConnector, ScriptedStore};
use docbridge::connection::{global, install_global};
use docbridge::{BridgeError, CancelToken, ConnectionManager};

fn manager_with(connector: ScriptedConnector) -> (Arc<ConnectionManager>, Arc<ScriptedConnector>) {
    let connector = Arc::new(connector);
    let manager = Arc::new(ConnectionManager::new(test_config(), connector.clone()));
    (manager, connector)
}

#[test]
fn test_lazy_until_first_use() {
    let (manager, connector) = manager_with(ScriptedConnector::new(ScriptedStore::new()));

    assert!(!manager.is_initialized());
    assert_eq!(connector.connects(), 0);

    let handle = manager.get_handle().unwrap();
    assert!(manager.is_initialized());
    assert_eq!(handle.generation(), 1);
    assert_eq!(connector.connects(), 1);
}

#[test]
fn test_sequential_callers_share_handle() {
    let (manager, connector) = manager_with(ScriptedConnector::new(ScriptedStore::new()));

    let first = manager.get_handle().unwrap();
    let second = manager.get_handle().unwrap();

    assert!(first.same_as(&second));
    assert_eq!(connector.connects(), 1);
    assert_eq!(manager.initialization_count(), 1);
}

#[test]
fn test_concurrent_first_callers_initialize_once() {
    let connector =
        ScriptedConnector::new(ScriptedStore::new()).with_delay(Duration::from_millis(100));
    let (manager, connector) = manager_with(connector);

    let callers = 8;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.get_handle()
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(connector.connects(), 1);
    assert_eq!(manager.initialization_count(), 1);
    for handle in &results[1..] {
        assert!(handle.same_as(&results[0]));
        assert_eq!(handle.generation(), results[0].generation());
    }
}

#[test]
fn test_failure_reaches_every_waiter() {
    let connector = ScriptedConnector::new(ScriptedStore::new())
        .with_delay(Duration::from_millis(100))
        .failing(1);
    let (manager, connector) = manager_with(connector);

    let callers = 4;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.get_handle()
            })
        })
        .collect();

    for handle in handles {
        match handle.join().unwrap() {
            Err(BridgeError::Connection(msg)) => assert_eq!(msg, "backend unreachable"),
            other => panic!("expected Connection error, got {:?}", other),
        }
    }

    assert_eq!(connector.connects(), 1);
    assert!(!manager.is_initialized());
}

#[test]
fn test_next_caller_retries_after_failure() {
    let (manager, connector) = manager_with(ScriptedConnector::new(ScriptedStore::new()).failing(1));

    assert!(matches!(
        manager.get_handle(),
        Err(BridgeError::Connection(_))
    ));

    let handle = manager.get_handle().unwrap();
    assert_eq!(handle.generation(), 2);
    assert_eq!(connector.connects(), 2);
}

#[test]
fn test_reset_forces_reconnect() {
    let (manager, connector) = manager_with(ScriptedConnector::new(ScriptedStore::new()));

    let first = manager.get_handle().unwrap();
    assert!(manager.reset());
    assert!(!manager.is_initialized());
    assert!(!manager.reset());

    let second = manager.get_handle().unwrap();
    assert_eq!(connector.connects(), 2);
    assert_eq!(second.generation(), 2);

    // Handles handed out earlier stay usable
    assert!(first
        .store()
        .ping(&CancelToken::new())
        .is_ok());
}

#[test]
fn test_cancelled_initializer_leaves_slot_empty() {
    let connector =
        ScriptedConnector::new(ScriptedStore::new()).with_delay(Duration::from_secs(30));
    let (manager, _connector) = manager_with(connector);

    let cancel = CancelToken::with_timeout(Duration::from_millis(50));
    let started = Instant::now();
    let err = manager.get_handle_with(&cancel).unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!manager.is_initialized());
}

#[test]
fn test_waiter_cancel_does_not_disturb_initializer() {
    let connector =
        ScriptedConnector::new(ScriptedStore::new()).with_delay(Duration::from_millis(300));
    let (manager, connector) = manager_with(connector);

    let initializer = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.get_handle())
    };

    // Let the initializer claim the slot
    thread::sleep(Duration::from_millis(50));

    let cancel = CancelToken::with_timeout(Duration::from_millis(50));
    let err = manager.get_handle_with(&cancel).unwrap_err();
    assert!(err.is_cancelled());

    let handle = initializer.join().unwrap().unwrap();
    assert_eq!(handle.generation(), 1);
    assert_eq!(connector.connects(), 1);
    assert!(manager.is_initialized());
}

#[test]
fn test_panicking_connector_does_not_wedge_manager() {
    struct PanicOnce(std::sync::atomic::AtomicBool, Arc<ScriptedStore>);

    impl docbridge::store::Connector for PanicOnce {
        fn connect(
            &self,
            _config: &docbridge::Config,
            _cancel: &CancelToken,
        ) -> docbridge::Result<Arc<dyn docbridge::store::DocumentStore>> {
            if !self.0.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("driver exploded");
            }
            Ok(self.1.clone() as Arc<dyn docbridge::store::DocumentStore>)
        }
    }

    let connector = Arc::new(PanicOnce(
        std::sync::atomic::AtomicBool::new(false),
        ScriptedStore::new(),
    ));
    let manager = Arc::new(ConnectionManager::new(test_config(), connector));

    let panicked = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.get_handle()).join()
    };
    assert!(panicked.is_err());

    let handle = manager.get_handle().unwrap();
    assert_eq!(handle.generation(), 2);
}

#[test]
fn test_global_install_once() {
    let (manager, _connector) = manager_with(ScriptedConnector::new(ScriptedStore::new()));

    let installed = install_global(Arc::clone(&manager)).unwrap();
    assert!(Arc::ptr_eq(&installed, &manager));
    assert!(Arc::ptr_eq(&global().unwrap(), &manager));

    let (other, _connector) = manager_with(ScriptedConnector::new(ScriptedStore::new()));
    assert!(matches!(
        install_global(other),
        Err(BridgeError::Configuration(_))
    ));
    assert!(Arc::ptr_eq(&global().unwrap(), &manager));
}
