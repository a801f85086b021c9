//! Retry Tests
//!
//! These tests verify:
//! - Exactly k waits before a success on attempt k+1
//! - Non-decreasing backoff
//! - Exhausted budgets report the last cause and attempt count
//! - Terminal failures are attempted once
//! - Cancellation is reported as Cancelled, not as a read failure

#[path = "../common/mod.rs"]
mod common;

use std::cell::Cell;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{harness, RecordingSleeper};
use docbridge::{fields, BridgeError, CancelToken, FailureKind, RetryPolicy, StoreFailure};

fn recorded_policy(max_attempts: u32) -> (RetryPolicy, Arc<RecordingSleeper>) {
    let sleeper = RecordingSleeper::new();
    let policy = RetryPolicy::new(max_attempts).with_sleeper(sleeper.clone());
    (policy, sleeper)
}

// =============================================================================
// Schedule
// =============================================================================

#[test]
fn test_default_schedule_doubles_from_one_unit() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts(), 3);
    assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    assert_eq!(policy.delay_for(1), Duration::from_secs(2));
    assert_eq!(policy.delay_for(2), Duration::from_secs(4));
}

#[test]
fn test_schedule_saturates() {
    let policy = RetryPolicy::new(3).with_unit(Duration::from_millis(1));
    let huge = policy.delay_for(200);
    assert!(huge >= policy.delay_for(31));
}

#[test]
fn test_custom_base_and_unit() {
    let policy = RetryPolicy::new(4)
        .with_base(3)
        .with_unit(Duration::from_millis(10));
    assert_eq!(policy.delay_for(0), Duration::from_millis(10));
    assert_eq!(policy.delay_for(1), Duration::from_millis(30));
    assert_eq!(policy.delay_for(2), Duration::from_millis(90));
}

// =============================================================================
// Success Paths
// =============================================================================

#[test]
fn test_first_attempt_success_has_no_waits() {
    let (policy, sleeper) = recorded_policy(3);
    let calls = Cell::new(0);

    let value = policy
        .run("doc", &CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            Ok(42)
        })
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(calls.get(), 1);
    assert!(sleeper.delays().is_empty());
}

#[test]
fn test_success_after_k_transient_failures() {
    for max_attempts in 1..=6u32 {
        for k in 0..max_attempts {
            let (policy, sleeper) = recorded_policy(max_attempts);
            let calls = Cell::new(0u32);

            let result = policy.run("doc", &CancelToken::new(), |attempt| {
                assert_eq!(attempt, calls.get());
                calls.set(calls.get() + 1);
                if attempt < k {
                    Err(StoreFailure::timeout(format!("attempt {}", attempt + 1)))
                } else {
                    Ok(attempt)
                }
            });

            assert_eq!(result.unwrap(), k, "N={} k={}", max_attempts, k);
            assert_eq!(calls.get(), k + 1);

            let delays = sleeper.delays();
            assert_eq!(delays.len(), k as usize);
            assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{:?}", delays);
        }
    }
}

// =============================================================================
// Failure Paths
// =============================================================================

#[test]
fn test_always_transient_exhausts_budget() {
    for max_attempts in 1..=5u32 {
        let (policy, sleeper) = recorded_policy(max_attempts);
        let calls = Cell::new(0u32);

        let err = policy
            .run::<(), _>("modules/missing", &CancelToken::new(), |attempt| {
                calls.set(calls.get() + 1);
                Err(StoreFailure::unavailable(format!("attempt {}", attempt + 1)))
            })
            .unwrap_err();

        assert_eq!(calls.get(), max_attempts);
        assert_eq!(sleeper.delays().len(), (max_attempts - 1) as usize);

        match err {
            BridgeError::Read {
                target,
                attempts,
                cause,
            } => {
                assert_eq!(target, "modules/missing");
                assert_eq!(attempts, max_attempts);
                assert_eq!(cause.message, format!("attempt {}", max_attempts));
            }
            other => panic!("expected Read error, got {:?}", other),
        }
    }
}

#[test]
fn test_terminal_failure_short_circuits() {
    let (policy, sleeper) = recorded_policy(5);
    let calls = Cell::new(0);

    let err = policy
        .run::<(), _>("doc", &CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            Err(StoreFailure::permission_denied("nope"))
        })
        .unwrap_err();

    assert_eq!(calls.get(), 1);
    assert!(sleeper.delays().is_empty());
    assert_eq!(err.attempts(), Some(1));
    assert_eq!(err.cause().unwrap().kind, FailureKind::PermissionDenied);
}

#[test]
fn test_unknown_failure_is_not_retried() {
    let (policy, _sleeper) = recorded_policy(3);
    let calls = Cell::new(0);

    let err = policy
        .run::<(), _>("doc", &CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            Err(StoreFailure::new(FailureKind::Unknown, "mystery"))
        })
        .unwrap_err();

    assert_eq!(calls.get(), 1);
    assert_eq!(err.attempts(), Some(1));
}

#[test]
fn test_transient_then_terminal_reports_terminal_cause() {
    let (policy, sleeper) = recorded_policy(5);

    let err = policy
        .run::<(), _>("doc", &CancelToken::new(), |attempt| {
            if attempt == 0 {
                Err(StoreFailure::timeout("slow"))
            } else {
                Err(StoreFailure::invalid_request("bad"))
            }
        })
        .unwrap_err();

    assert_eq!(sleeper.delays().len(), 1);
    assert_eq!(err.attempts(), Some(2));
    assert_eq!(err.cause().unwrap().kind, FailureKind::InvalidRequest);
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_cancelled_before_first_attempt() {
    let (policy, _sleeper) = recorded_policy(3);
    let cancel = CancelToken::new();
    cancel.cancel();
    let calls = Cell::new(0);

    let err = policy
        .run("doc", &cancel, |_| {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_failure_after_cancel_is_cancelled() {
    let (policy, sleeper) = recorded_policy(3);
    let cancel = CancelToken::new();

    let err = policy
        .run::<(), _>("doc", &cancel, |_| {
            cancel.cancel();
            Err(StoreFailure::timeout("interrupted"))
        })
        .unwrap_err();

    assert!(err.is_cancelled(), "{:?}", err);
    assert!(sleeper.delays().is_empty());
}

#[test]
fn test_cancel_interrupts_backoff_wait() {
    let policy = RetryPolicy::new(3).with_unit(Duration::from_secs(30));
    let cancel = CancelToken::new();

    let canceller = cancel.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        canceller.cancel();
    });

    let started = Instant::now();
    let err = policy
        .run::<(), _>("doc", &cancel, |_| Err(StoreFailure::timeout("slow")))
        .unwrap_err();
    handle.join().unwrap();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_deadline_interrupts_backoff_wait() {
    let policy = RetryPolicy::new(3).with_unit(Duration::from_secs(30));
    let cancel = CancelToken::with_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let err = policy
        .run::<(), _>("doc", &cancel, |_| Err(StoreFailure::unavailable("down")))
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

// =============================================================================
// Through the Client
// =============================================================================

#[test]
fn test_get_document_recovers_after_two_timeouts() {
    let h = harness();
    h.store.seed("modules", "m1", fields([("domain", "apis")]));
    h.store.fail_gets(vec![
        StoreFailure::timeout("attempt 1"),
        StoreFailure::timeout("attempt 2"),
    ]);

    let doc = h.client.get_document("modules", "m1").unwrap().unwrap();

    assert_eq!(doc.id(), "m1");
    assert_eq!(doc.get("domain").and_then(|v| v.as_str()), Some("apis"));
    assert_eq!(h.store.gets(), 3);
    assert_eq!(
        h.sleeper.delays(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[test]
fn test_get_document_gives_up_after_three_transient_failures() {
    let h = harness();
    h.store.fail_gets(vec![
        StoreFailure::timeout("attempt 1"),
        StoreFailure::unavailable("attempt 2"),
        StoreFailure::timeout("attempt 3"),
    ]);

    let err = h.client.get_document("modules", "missing").unwrap_err();

    assert_eq!(h.store.gets(), 3);
    match err {
        BridgeError::Read {
            target,
            attempts,
            cause,
        } => {
            assert_eq!(target, "modules/missing");
            assert_eq!(attempts, 3);
            assert_eq!(cause.message, "attempt 3");
        }
        other => panic!("expected Read error, got {:?}", other),
    }
}

#[test]
fn test_get_document_absent_is_none() {
    let h = harness();
    assert!(h.client.get_document("modules", "nothing").unwrap().is_none());
    assert_eq!(h.store.gets(), 1);
}

#[test]
fn test_get_document_terminal_failure_not_retried() {
    let h = harness();
    h.store
        .fail_gets(vec![StoreFailure::permission_denied("rules deny read")]);

    let err = h.client.get_document("modules", "m1").unwrap_err();

    assert_eq!(h.store.gets(), 1);
    assert_eq!(err.attempts(), Some(1));
    assert!(h.sleeper.delays().is_empty());
}

#[test]
fn test_query_retried_on_transient_failure() {
    let h = harness();
    h.store.seed("modules", "m1", fields([("domain", "apis")]));
    h.store
        .fail_queries(vec![StoreFailure::new(FailureKind::RateLimited, "slow down")]);

    let spec = h
        .client
        .query_builder("modules")
        .filter("domain", "==", "apis")
        .build()
        .unwrap();
    let docs: Vec<_> = h.client.query(&spec).unwrap().collect();

    assert_eq!(docs.len(), 1);
    assert_eq!(h.store.queries(), 2);
    assert_eq!(h.sleeper.delays().len(), 1);
}

#[test]
fn test_get_document_rejects_empty_reference() {
    let h = harness();
    let err = h.client.get_document("", "m1").unwrap_err();
    assert!(matches!(err, BridgeError::Configuration(_)));
    assert_eq!(h.store.gets(), 0);
}
