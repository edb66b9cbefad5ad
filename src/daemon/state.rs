//! Daemon state: the table of live transfer objects.
//!
//! Lives on the shell thread. Requests may nest (a stream read pumps the
//! queue and runs other requests), so the table lock is only held to look
//! an object up, never across a call into it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::source::ContentSource;
use crate::sync::TaskQueue;
use crate::transfer::{LifecycleState, Services, TransferConfig, TransferObject};

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Objects offered through the daemon, keyed by wire id.
///
/// References are owned by clients, not connections: an object offered by
/// one invocation stays alive until some invocation releases it.
pub struct ShellState {
    objects: Mutex<HashMap<u64, Arc<TransferObject>>>,
    config: Arc<TransferConfig>,
    services: Services,
}

impl std::fmt::Debug for ShellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellState")
            .field("objects", &self.objects.lock().len())
            .field("config", &self.config)
            .finish()
    }
}

impl ShellState {
    pub fn new(config: TransferConfig, services: Services) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            config: Arc::new(config),
            services,
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.services.queue
    }

    /// Create an object for `source` and take the caller's first reference.
    ///
    /// Returns the object and its reference count.
    pub fn offer(
        &self,
        source: Arc<dyn ContentSource>,
        source_url: Option<String>,
    ) -> (Arc<TransferObject>, u32) {
        let object = TransferObject::new(source, Arc::clone(&self.config), self.services.clone());
        object.set_source_url(source_url);
        let count = object.add_ref();

        let mut objects = self.objects.lock();
        objects.retain(|_, live| live.state() == LifecycleState::Active);
        objects.insert(object.id().get(), Arc::clone(&object));
        tracing::info!(object = %object.id(), live = objects.len(), "object offered");
        (object, count)
    }

    /// A live object, or `None` once it was released or torn down.
    pub fn lookup(&self, id: u64) -> Option<Arc<TransferObject>> {
        let mut objects = self.objects.lock();
        let object = objects.get(&id)?;
        if object.state() != LifecycleState::Active {
            objects.remove(&id);
            return None;
        }
        if object.ref_count() == 0 {
            return None;
        }
        Some(Arc::clone(object))
    }

    /// Drop every outstanding client reference.
    ///
    /// Each object is left holding only its keep-alive, whose queued
    /// release finishes the teardown.
    pub fn release_all(&self) {
        let objects: Vec<Arc<TransferObject>> =
            self.objects.lock().drain().map(|(_, object)| object).collect();
        for object in objects {
            while object.ref_count() > 1 {
                object.release();
            }
            tracing::debug!(object = %object.id(), "released at shutdown");
        }
    }
}
