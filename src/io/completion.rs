//! Completion handles
//!
//! Every hand-off between pipeline stages is a one-shot [`Completion`] backed
//! by a crossbeam channel, or a many-waiter [`Latch`]. Waits are bounded: an
//! expired wait is logged and retried, only an explicit error fails.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, WalError};

/// Sending half of a one-shot completion
#[derive(Debug)]
pub struct Completer<T> {
    tx: Sender<Result<T>>,
}

/// Receiving half of a one-shot completion
#[derive(Debug)]
pub struct Completion<T> {
    rx: Receiver<Result<T>>,
    what: &'static str,
    timeout: Duration,
}

/// Create a linked completer/completion pair.
///
/// `what` names the operation in expired-wait warnings; `timeout` bounds each
/// individual wait.
pub fn completion<T>(what: &'static str, timeout: Duration) -> (Completer<T>, Completion<T>) {
    let (tx, rx) = channel::bounded(1);
    (Completer { tx }, Completion { rx, what, timeout })
}

impl<T> Completer<T> {
    /// Deliver the outcome. A waiter that already went away is not an error.
    pub fn complete(self, result: Result<T>) {
        let _ = self.tx.send(result);
    }
}

impl<T> Completion<T> {
    /// Block until the outcome arrives.
    pub fn wait(self) -> Result<T> {
        let mut expired = 0u32;
        loop {
            match self.rx.recv_timeout(self.timeout) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    expired += 1;
                    tracing::warn!(
                        what = self.what,
                        expired,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "completion wait expired, retrying"
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WalError::Disconnected(self.what.to_string()))
                }
            }
        }
    }

    /// Single wait of at most `timeout`; `None` if nothing arrived.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(Err(WalError::Disconnected(self.what.to_string())))
            }
        }
    }

    /// True once the outcome is waiting to be collected
    pub fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Many-waiter one-way gate
#[derive(Debug, Default)]
pub struct Latch {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the latch and wake every waiter.
    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Block until opened, logging every expired `timeout`.
    pub fn wait(&self, what: &'static str, timeout: Duration) {
        let mut open = self.open.lock();
        while !*open {
            if self.cond.wait_for(&mut open, timeout).timed_out() && !*open {
                tracing::warn!(
                    what,
                    timeout_ms = timeout.as_millis() as u64,
                    "latch wait expired, retrying"
                );
            }
        }
    }
}
