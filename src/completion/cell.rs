//! Single-assignment value with blocking and async waits

use std::fmt;
use std::pin::pin;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::{PipelineError, Result};

/// A value written once and read any number of times.
///
/// Readers can poll with [`get`](Self::get), block with [`wait`](Self::wait)
/// or [`wait_timeout`](Self::wait_timeout), or await
/// [`wait_async`](Self::wait_async) from a tokio task.
pub struct CompletionCell<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
    notify: Notify,
}

impl<T> Default for CompletionCell<T> {
    fn default() -> Self {
        Self { value: Mutex::new(None), ready: Condvar::new(), notify: Notify::new() }
    }
}

impl<T: Clone> CompletionCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the value and wake every waiter.
    ///
    /// # Errors
    ///
    /// [`PipelineError::AlreadyFinalized`] if a value was already stored; the
    /// first value is kept.
    pub fn set(&self, value: T) -> Result<()> {
        {
            let mut slot = self.value.lock();
            if slot.is_some() {
                return Err(PipelineError::AlreadyFinalized);
            }
            *slot = Some(value);
        }
        self.ready.notify_all();
        self.notify.notify_waiters();
        Ok(())
    }

    /// The value, if already stored
    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Block until the value is stored
    pub fn wait(&self) -> T {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Block until the value is stored or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        self.wait_deadline(Instant::now() + timeout, timeout)
    }

    /// Block until `deadline`; `timeout` is what a timeout error reports
    pub(crate) fn wait_deadline(&self, deadline: Instant, timeout: Duration) -> Result<T> {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return Ok(value.clone());
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone().ok_or(PipelineError::Timeout { duration: timeout });
            }
        }
    }

    /// Wait for the value without blocking the executor thread
    pub async fn wait_async(&self) -> T {
        loop {
            let mut notified = pin!(self.notify.notified());
            // register before checking so a concurrent `set` cannot slip between
            notified.as_mut().enable();
            if let Some(value) = self.get() {
                return value;
            }
            notified.await;
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CompletionCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionCell").field("value", &*self.value.lock()).finish()
    }
}
