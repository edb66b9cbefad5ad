//! Ownership count with a self keep-alive.
//!
//! The first `add_ref` makes the object hold a strong reference to
//! itself, so a holder that briefly drops to zero does not destroy it.
//! Dropping back to one posts the keep-alive release onto the shell
//! queue; reaching zero posts the teardown there as well, so teardown
//! never runs on the releasing caller's stack.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::sync::TaskQueue;

/// Per-object lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Active = 0,
    PendingDeferredCleanup = 1,
    Deleted = 2,
}

/// Shared lifecycle cell; outlives the object so a deferred removal can
/// finish the transition after the object is gone.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Active as u8))
    }

    pub fn get(&self) -> LifecycleState {
        match self.0.load(Ordering::Acquire) {
            0 => LifecycleState::Active,
            1 => LifecycleState::PendingDeferredCleanup,
            _ => LifecycleState::Deleted,
        }
    }

    /// `Active -> PendingDeferredCleanup`. True for exactly one caller.
    pub fn begin_teardown(&self) -> bool {
        self.0
            .compare_exchange(
                LifecycleState::Active as u8,
                LifecycleState::PendingDeferredCleanup as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn mark_deleted(&self) {
        self.0.store(LifecycleState::Deleted as u8, Ordering::Release);
    }
}

struct Counts<T> {
    count: u32,
    keep_alive: Option<Arc<T>>,
}

pub struct Lifetime<T> {
    counts: Mutex<Counts<T>>,
    state: Arc<StateCell>,
}

impl<T> Default for Lifetime<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Lifetime<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts = self.counts.lock();
        f.debug_struct("Lifetime")
            .field("count", &counts.count)
            .field("keep_alive", &counts.keep_alive.is_some())
            .field("state", &self.state.get())
            .finish()
    }
}

impl<T> Lifetime<T> {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(Counts {
                count: 0,
                keep_alive: None,
            }),
            state: Arc::new(StateCell::new()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn state_cell(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    pub fn count(&self) -> u32 {
        self.counts.lock().count
    }
}

/// An object whose lifetime is driven by [`add_ref`] and [`release`].
pub trait Counted: Send + Sync + Sized + 'static {
    fn lifetime(&self) -> &Lifetime<Self>;

    fn shell_queue(&self) -> &TaskQueue;

    /// Runs once, when the count first reaches zero.
    fn teardown(self: Arc<Self>);
}

/// Take a reference. Returns the new count.
///
/// Going from zero to one also takes the keep-alive, which counts as a
/// reference of its own. A torn-down object is never revived.
pub fn add_ref<T: Counted>(this: &Arc<T>) -> u32 {
    let lifetime = this.lifetime();
    if lifetime.state() != LifecycleState::Active {
        tracing::warn!(state = ?lifetime.state(), "add_ref on a torn-down object ignored");
        return 0;
    }
    let mut counts = lifetime.counts.lock();
    counts.count += 1;
    if counts.count == 1 {
        counts.keep_alive = Some(Arc::clone(this));
        counts.count += 1;
    }
    counts.count
}

/// Drop a reference. Returns the new count.
pub fn release<T: Counted>(this: &Arc<T>) -> u32 {
    let lifetime = this.lifetime();
    let (count, holds_keep_alive) = {
        let mut counts = lifetime.counts.lock();
        if counts.count == 0 {
            tracing::warn!("release without a matching add_ref");
            return 0;
        }
        counts.count -= 1;
        (counts.count, counts.keep_alive.is_some())
    };

    match count {
        1 if holds_keep_alive => {
            let target = Arc::clone(this);
            if this.shell_queue().post(move || release_keep_alive(&target)).is_err() {
                release_keep_alive(this);
            }
        }
        0 => {
            let target = Arc::clone(this);
            if this.shell_queue().post(move || run_teardown(target)).is_err() {
                tracing::debug!("shell queue closed, tearing down inline");
                run_teardown(Arc::clone(this));
            }
        }
        _ => {}
    }
    count
}

fn release_keep_alive<T: Counted>(this: &Arc<T>) {
    let keep_alive = this.lifetime().counts.lock().keep_alive.take();
    if keep_alive.is_some() {
        release(this);
    }
}

fn run_teardown<T: Counted>(this: Arc<T>) {
    if this.lifetime().state.begin_teardown() {
        this.teardown();
    }
}
