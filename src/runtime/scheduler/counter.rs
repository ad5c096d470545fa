//! Outstanding async work counter
//!
//! Counts submitted/scheduled invocations that have not finished and periodic
//! tasks that are still registered. A host process waits on it before exiting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::warn;

static GLOBAL: Lazy<Arc<AsyncCounter>> = Lazy::new(|| Arc::new(AsyncCounter::new()));

/// Count of outstanding async operations. Never goes below zero.
#[derive(Debug, Default)]
pub struct AsyncCounter {
    count: Mutex<usize>,
    idle: Condvar,
}

impl AsyncCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide counter workers use unless given another one.
    pub fn global() -> Arc<AsyncCounter> {
        GLOBAL.clone()
    }

    /// Increment and return the new count.
    pub fn increment(&self) -> usize {
        let mut count = self.count.lock();
        *count += 1;
        *count
    }

    /// Decrement and return the new count. A decrement at zero is ignored.
    pub fn decrement(&self) -> usize {
        let mut count = self.count.lock();
        if *count == 0 {
            warn!("async counter decremented below zero, ignoring");
            return 0;
        }
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
        *count
    }

    pub fn get(&self) -> usize {
        *self.count.lock()
    }

    /// Block until the count reaches zero. Returns false on timeout.
    pub fn wait_idle(
        &self,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}
