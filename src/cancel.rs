//! Cancellation Module
//!
//! A `CancelToken` carries an external stop signal into every blocking point
//! of the access layer: connection init, backoff waits, and network calls.
//!
//! ## Sources of cancellation
//! - Explicit: any clone calls `cancel()`
//! - Deadline: the token was built with `with_timeout` and the time ran out
//!
//! Blocking code either waits on the token directly (`sleep`), bounds its own
//! timeouts with `bound()`, or registers an `on_cancel` hook that interrupts
//! an in-flight call (e.g. shutting down a socket).
//!
//! Tokens can be linked: a `child()` fires with its parent, and `follow()`
//! makes a token fire with any number of others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{BridgeError, Result};

type Hook = Box<dyn FnOnce() + Send>;

/// Shared cancellation signal with an optional deadline
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    signal: Condvar,
    deadline: Option<Instant>,
    next_hook_id: AtomicU64,
    /// Registrations on the tokens this one follows
    links: Mutex<Vec<CancelHook>>,
}

struct State {
    cancelled: bool,
    hooks: Vec<(u64, Hook)>,
}

impl CancelToken {
    /// A token that only fires when `cancel()` is called
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A token that also fires once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    /// A token that also fires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    cancelled: false,
                    hooks: Vec::new(),
                }),
                signal: Condvar::new(),
                deadline,
                next_hook_id: AtomicU64::new(0),
                links: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A token with the same deadline that also fires when this one is
    /// cancelled. Cancelling the child leaves this token untouched.
    pub fn child(&self) -> CancelToken {
        let child = Self::build(self.inner.deadline);
        child.follow(self);
        child
    }

    /// Also fire this token when `other` is cancelled explicitly
    ///
    /// Only the explicit signal is linked; `other`'s deadline is not.
    pub fn follow(&self, other: &CancelToken) {
        let target: Weak<Inner> = Arc::downgrade(&self.inner);
        let link = other.on_cancel(move || {
            if let Some(inner) = target.upgrade() {
                CancelToken { inner }.cancel();
            }
        });
        self.inner.links.lock().push(link);
    }

    /// Fire the token, waking sleepers and running registered hooks
    pub fn cancel(&self) {
        let hooks = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.hooks)
        };
        self.inner.signal.notify_all();

        for (_, hook) in hooks {
            hook();
        }
    }

    /// True once cancelled explicitly or past the deadline
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled || self.deadline_passed()
    }

    fn deadline_passed(&self) -> bool {
        self.inner
            .deadline
            .map(|d| Instant::now() >= d)
            .unwrap_or(false)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Clamp `timeout` to the remaining time (never below 1ms, which
    /// socket timeouts reject as zero)
    pub fn bound(&self, timeout: Duration) -> Duration {
        let bounded = match self.remaining() {
            Some(left) => timeout.min(left),
            None => timeout,
        };
        bounded.max(Duration::from_millis(1))
    }

    /// Return `Cancelled` if the token has fired
    pub fn check(&self, what: &str) -> Result<()> {
        if self.inner.state.lock().cancelled {
            return Err(BridgeError::Cancelled(format!("{} was cancelled", what)));
        }
        if self.deadline_passed() {
            return Err(BridgeError::Cancelled(format!(
                "{} exceeded its deadline",
                what
            )));
        }
        Ok(())
    }

    /// Wait for `duration`, returning early with `Cancelled` if the token fires
    pub fn sleep(&self, duration: Duration, what: &str) -> Result<()> {
        let wake_at = Instant::now() + duration;
        let until = match self.inner.deadline {
            Some(deadline) if deadline < wake_at => deadline,
            _ => wake_at,
        };

        {
            let mut state = self.inner.state.lock();
            while !state.cancelled && Instant::now() < until {
                self.inner.signal.wait_until(&mut state, until);
            }
        }

        self.check(what)
    }

    /// Run `hook` when the token is cancelled explicitly
    ///
    /// Runs immediately if already cancelled. The hook is unregistered when
    /// the returned guard drops. Deadlines do not trigger hooks; callers
    /// bound their own timeouts with `bound()`.
    pub fn on_cancel<F>(&self, hook: F) -> CancelHook
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            drop(state);
            hook();
            return CancelHook { registration: None };
        }

        let id = self.inner.next_hook_id.fetch_add(1, Ordering::Relaxed);
        state.hooks.push((id, Box::new(hook)));

        CancelHook {
            registration: Some((Arc::clone(&self.inner), id)),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

/// Registration guard returned by `CancelToken::on_cancel`
pub struct CancelHook {
    registration: Option<(Arc<Inner>, u64)>,
}

impl Drop for CancelHook {
    fn drop(&mut self) {
        if let Some((inner, id)) = self.registration.take() {
            inner.state.lock().hooks.retain(|(hook_id, _)| *hook_id != id);
        }
    }
}
