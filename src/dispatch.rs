//! Read dispatch
//!
//! A small worker pool that runs reads off the caller's thread, so retry
//! backoff waits block a pool worker instead of request-handling code.
//!
//! ## Architecture
//! - Jobs travel over a bounded crossbeam channel; `submit` blocks while the
//!   queue is full
//! - `workers` threads named `docbridge-read-N` drain it
//! - Each job reports through its own bounded(1) channel, surfaced as `Pending`
//! - Every job receives the pool's shutdown token
//! - Dropping the pool fires that token, closes the channel and joins the
//!   workers, so jobs waiting out a backoff end early with `Cancelled`

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::cancel::CancelToken;
use crate::error::{BridgeError, Result};

/// Queued jobs allowed per worker before `submit` blocks
const QUEUE_DEPTH_PER_WORKER: usize = 64;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of read workers
pub struct ReadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: CancelToken,
}

impl ReadPool {
    /// Spawn `workers` threads (at least one)
    pub fn new(workers: usize) -> Result<Self> {
        let count = workers.max(1);
        let (sender, receiver) = channel::bounded::<Job>(count * QUEUE_DEPTH_PER_WORKER);

        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let jobs = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("docbridge-read-{}", i))
                .spawn(move || {
                    for job in jobs.iter() {
                        // A panicking job drops its result sender; the worker lives on
                        let _ = panic::catch_unwind(AssertUnwindSafe(job));
                    }
                })?;
            handles.push(handle);
        }

        tracing::debug!("Started read pool with {} workers", count);

        Ok(Self {
            sender: Some(sender),
            workers: handles,
            shutdown: CancelToken::new(),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Token fired when the pool shuts down
    pub fn shutdown_token(&self) -> &CancelToken {
        &self.shutdown
    }

    /// Run `task` on a worker
    ///
    /// `task` is handed the pool's shutdown token and should stop waiting
    /// once it fires.
    pub fn submit<T, F>(&self, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        let (done_tx, done_rx) = channel::bounded(1);
        let shutdown = self.shutdown.clone();
        let job: Job = Box::new(move || {
            let result = match shutdown.check("read") {
                Ok(()) => task(&shutdown),
                Err(e) => Err(e),
            };
            // The caller may have stopped waiting; nothing to do then
            let _ = done_tx.send(result);
        });

        if let Some(sender) = &self.sender {
            if sender.send(job).is_ok() {
                return Pending { receiver: done_rx };
            }
        }

        let (failed_tx, failed_rx) = channel::bounded(1);
        let _ = failed_tx.send(Err(BridgeError::Cancelled(
            "read pool is shut down".to_string(),
        )));
        Pending {
            receiver: failed_rx,
        }
    }
}

impl Drop for ReadPool {
    fn drop(&mut self) {
        // Queued jobs still run, but see the fired token and end at once
        self.shutdown.cancel();
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Result of a submitted read, available later
#[derive(Debug)]
pub struct Pending<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// Block until the read finishes
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().unwrap_or_else(|_| Err(worker_lost()))
    }

    /// Block up to `timeout`; `Cancelled` if it elapses first
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::Cancelled(format!(
                "no result within {:?}",
                timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(worker_lost()),
        }
    }

    /// Take the result if it is ready
    pub fn try_take(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(worker_lost())),
        }
    }
}

fn worker_lost() -> BridgeError {
    BridgeError::Cancelled("read worker exited before finishing".to_string())
}
