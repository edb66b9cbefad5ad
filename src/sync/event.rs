//! Manual-reset completion event and its signal-on-drop guard.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A latch that stays signalled once set until explicitly reset.
///
/// Any number of threads may wait; `set` wakes all of them.
#[derive(Debug, Default)]
pub struct ManualResetEvent {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl ManualResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event and wake every waiter.
    pub fn set(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cond.notify_all();
    }

    #[cfg(test)]
    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signalled.lock()
    }

    /// Block until the event is signalled.
    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.cond.wait(&mut signalled);
        }
    }

    /// Block until signalled or `timeout` elapses. Returns whether the
    /// event was signalled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signalled = self.signalled.lock();
        while !*signalled {
            if self.cond.wait_until(&mut signalled, deadline).timed_out() {
                return *signalled;
            }
        }
        true
    }
}

/// Signals its event when dropped.
///
/// Handed to a background producer (the icon cache) so that a reader
/// blocked on the event is released no matter how the producer exits.
#[derive(Debug)]
pub struct CompletionGuard {
    event: Arc<ManualResetEvent>,
}

impl CompletionGuard {
    pub fn new(event: Arc<ManualResetEvent>) -> Self {
        Self { event }
    }

    /// `true` while nobody has signalled the event yet, i.e. a reader may
    /// still be waiting for this guard's producer.
    pub fn is_waiting(&self) -> bool {
        !self.event.is_set()
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.event.set();
    }
}
