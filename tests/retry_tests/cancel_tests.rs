//! Cancellation Tests
//!
//! These tests verify:
//! - Sleeps run to completion when nothing fires
//! - Explicit cancel and deadlines wake sleepers early
//! - Hooks run once on cancel and never after their guard drops
//! - Timeouts are clamped to the deadline
//! - Child and followed tokens fire with the tokens they link to

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use docbridge::{BridgeError, CancelToken};

#[test]
fn test_fresh_token_is_live() {
    let token = CancelToken::new();
    assert!(!token.is_cancelled());
    assert!(token.deadline().is_none());
    assert!(token.remaining().is_none());
    assert!(token.check("read").is_ok());
}

#[test]
fn test_sleep_completes_without_cancel() {
    let token = CancelToken::new();
    let started = Instant::now();
    token.sleep(Duration::from_millis(30), "wait").unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_cancel_is_visible_to_clones() {
    let token = CancelToken::new();
    let clone = token.clone();
    clone.cancel();

    assert!(token.is_cancelled());
    match token.check("read modules/m1") {
        Err(BridgeError::Cancelled(msg)) => assert!(msg.contains("read modules/m1")),
        other => panic!("expected Cancelled, got {:?}", other),
    }
}

#[test]
fn test_cancel_wakes_sleeper() {
    let token = CancelToken::new();
    let canceller = token.clone();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        canceller.cancel();
    });

    let started = Instant::now();
    let err = token.sleep(Duration::from_secs(60), "backoff").unwrap_err();
    handle.join().unwrap();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_deadline_cuts_sleep_short() {
    let token = CancelToken::with_timeout(Duration::from_millis(40));

    let started = Instant::now();
    let err = token.sleep(Duration::from_secs(60), "backoff").unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(token.is_cancelled());
    assert_eq!(token.remaining(), Some(Duration::ZERO));
}

#[test]
fn test_past_deadline_fails_check() {
    let token = CancelToken::with_deadline(Instant::now());
    match token.check("connect") {
        Err(BridgeError::Cancelled(msg)) => assert!(msg.contains("deadline")),
        other => panic!("expected Cancelled, got {:?}", other),
    }
}

#[test]
fn test_bound_clamps_to_remaining() {
    let unbounded = CancelToken::new();
    assert_eq!(
        unbounded.bound(Duration::from_secs(5)),
        Duration::from_secs(5)
    );

    let token = CancelToken::with_timeout(Duration::from_millis(200));
    assert!(token.bound(Duration::from_secs(5)) <= Duration::from_millis(200));

    let expired = CancelToken::with_deadline(Instant::now());
    assert_eq!(
        expired.bound(Duration::from_secs(5)),
        Duration::from_millis(1)
    );
}

#[test]
fn test_hook_runs_once_on_cancel() {
    let token = CancelToken::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&fired);
    let _guard = token.on_cancel(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    token.cancel();
    token.cancel();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dropped_hook_never_runs() {
    let token = CancelToken::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&fired);
    let guard = token.on_cancel(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    drop(guard);

    token.cancel();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn test_hook_on_cancelled_token_runs_immediately() {
    let token = CancelToken::new();
    token.cancel();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let _guard = token.on_cancel(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_child_fires_with_parent_but_not_back() {
    let parent = CancelToken::new();
    let child = parent.child();
    child.cancel();
    assert!(!parent.is_cancelled());

    let child = parent.child();
    parent.cancel();
    assert!(child.is_cancelled());
    assert!(child.check("read").unwrap_err().is_cancelled());
}

#[test]
fn test_follow_links_several_tokens() {
    let client = CancelToken::new();
    let pool = CancelToken::new();
    let job = client.child();
    job.follow(&pool);

    let woke = {
        let job = job.clone();
        thread::spawn(move || job.sleep(Duration::from_secs(30), "backoff"))
    };
    thread::sleep(Duration::from_millis(50));
    pool.cancel();

    assert!(woke.join().unwrap().unwrap_err().is_cancelled());
    assert!(!client.is_cancelled());

    // Following an already-fired token fires at once
    let late = CancelToken::new();
    late.follow(&pool);
    assert!(late.is_cancelled());
}
