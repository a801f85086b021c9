//! Retry Policy
//!
//! Bounded exponential backoff around read operations.
//!
//! ## Schedule
//! Attempt `n` (starting at 0) that fails transiently is followed by a wait of
//! `unit * base^n`, so with the defaults (base 2, unit 1s) the waits are
//! 1s, 2s, 4s, ... The schedule is monotonically non-decreasing and saturates
//! instead of overflowing.
//!
//! ## Giving up
//! - Terminal failure: immediately, after a single attempt
//! - Transient failure on the last permitted attempt
//! - Cancellation: before an attempt, during a wait, or when a failure is
//!   observed on an already-cancelled token

use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::classify::classify;
use crate::config::Config;
use crate::error::{BridgeError, Result, StoreResult};

/// Performs the wait between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration, cancel: &CancelToken) -> Result<()>;
}

/// Default sleeper: waits on the cancel token so a wait aborts promptly
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenSleeper;

impl Sleeper for TokenSleeper {
    fn sleep(&self, delay: Duration, cancel: &CancelToken) -> Result<()> {
        cancel.sleep(delay, "retry backoff")
    }
}

/// Retry configuration plus the loop that applies it
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: u32,
    unit: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BASE: u32 = 2;
    pub const DEFAULT_UNIT: Duration = Duration::from_secs(1);

    /// Policy with the default base and unit
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base: Self::DEFAULT_BASE,
            unit: Self::DEFAULT_UNIT,
            sleeper: Arc::new(TokenSleeper),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_retry_attempts)
            .with_base(config.backoff_base)
            .with_unit(config.backoff_unit)
    }

    pub fn with_base(mut self, base: u32) -> Self {
        self.base = base.max(1);
        self
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// Replace the sleeper (tests record delays instead of waiting)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait inserted after failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.base.checked_pow(attempt).unwrap_or(u32::MAX);
        self.unit.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails terminally, or runs out of attempts
    ///
    /// `op` receives the 0-based attempt number. `target` names what is being
    /// read and ends up in the resulting `Read` error.
    pub fn run<T, F>(&self, target: &str, cancel: &CancelToken, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> StoreResult<T>,
    {
        let mut attempt: u32 = 0;

        loop {
            cancel.check(target)?;

            let cause = match op(attempt) {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!("{} succeeded on attempt {}", target, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(cause) => cause,
            };

            // A failure seen after cancellation is the cancellation itself
            cancel.check(target)?;

            let attempts = attempt + 1;

            if !classify(&cause).is_transient() {
                tracing::debug!("{} failed terminally on attempt {}: {}", target, attempts, cause);
                return Err(BridgeError::Read {
                    target: target.to_string(),
                    attempts,
                    cause,
                });
            }

            if attempts >= self.max_attempts {
                tracing::error!(
                    "Failed to read {} after {} attempts: {}",
                    target,
                    attempts,
                    cause
                );
                return Err(BridgeError::Read {
                    target: target.to_string(),
                    attempts,
                    cause,
                });
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                "{} attempt {}/{} failed ({}), retrying in {:?}",
                target,
                attempts,
                self.max_attempts,
                cause,
                delay
            );
            self.sleeper.sleep(delay, cancel)?;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base", &self.base)
            .field("unit", &self.unit)
            .finish()
    }
}
