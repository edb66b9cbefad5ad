//! Deferred removal of temporary files after teardown.
//!
//! Consumers may still be reading a handed-out path after the object's
//! last reference is gone, so the file is removed after a grace period,
//! or as soon as the daemon shuts down, whichever comes first.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::lifetime::StateCell;

/// Shutdown observer and task tracker shared by every deferred removal.
#[derive(Debug, Clone)]
pub struct CleanupScope {
    token: CancellationToken,
    tracker: TaskTracker,
    runtime: Handle,
}

impl CleanupScope {
    pub fn new(runtime: Handle) -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            runtime,
        }
    }

    /// Fire every armed removal now and stop accepting new ones.
    pub fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
    }

    /// Wait for armed removals to finish. Call after [`CleanupScope::shutdown`].
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

/// One-shot "delete if present" with two triggers.
#[derive(Debug)]
pub struct DeferredRemoval {
    path: PathBuf,
    fired: AtomicBool,
    state: Arc<StateCell>,
}

impl DeferredRemoval {
    pub fn new(path: PathBuf, state: Arc<StateCell>) -> Self {
        Self {
            path,
            fired: AtomicBool::new(false),
            state,
        }
    }

    /// Delete the file unless a trigger already did. Returns whether this
    /// call was the one that acted.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "temporary file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "temporary file removal failed");
            }
        }
        self.state.mark_deleted();
        true
    }

    /// Schedule the removal: after `grace`, or on shutdown.
    pub fn arm(self, scope: &CleanupScope, grace: Duration) {
        let removal = Arc::new(self);
        let token = scope.token.clone();
        let task_removal = Arc::clone(&removal);
        scope.tracker.spawn_on(
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(grace) => {}
                    _ = token.cancelled() => {
                        tracing::debug!(path = %task_removal.path.display(), "shutdown before grace period elapsed");
                    }
                }
                task_removal.fire();
            },
            &scope.runtime,
        );
    }
}

impl Drop for DeferredRemoval {
    fn drop(&mut self) {
        // A task dropped by runtime shutdown still removes its file.
        self.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::lifetime::{Lifetime, LifecycleState};

    fn pending_state() -> Arc<StateCell> {
        let lifetime: Lifetime<()> = Lifetime::new();
        let cell = lifetime.state_cell();
        assert!(cell.begin_teardown());
        cell
    }

    fn temp_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("artifact.png");
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn fires_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_file(&dir);
        let state = pending_state();
        let removal = DeferredRemoval::new(path.clone(), Arc::clone(&state));

        assert!(removal.fire());
        assert!(!removal.fire());
        assert!(!path.exists());
        assert_eq!(state.get(), LifecycleState::Deleted);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let removal = DeferredRemoval::new(dir.path().join("gone"), pending_state());
        assert!(removal.fire());
    }

    #[tokio::test]
    async fn grace_timer_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_file(&dir);
        let scope = CleanupScope::new(Handle::current());

        DeferredRemoval::new(path.clone(), pending_state()).arm(&scope, Duration::from_millis(20));
        assert!(path.exists());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn shutdown_preempts_grace_timer() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_file(&dir);
        let state = pending_state();
        let scope = CleanupScope::new(Handle::current());

        DeferredRemoval::new(path.clone(), Arc::clone(&state)).arm(&scope, Duration::from_secs(3600));
        scope.shutdown();
        tokio::time::timeout(Duration::from_secs(5), scope.wait())
            .await
            .unwrap();

        assert!(!path.exists());
        assert_eq!(state.get(), LifecycleState::Deleted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timer_racing_shutdown_deletes_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for round in 0..32 {
            let path = dir.path().join(format!("race-{round}.png"));
            std::fs::write(&path, b"data").unwrap();
            let state = pending_state();
            let scope = CleanupScope::new(Handle::current());

            DeferredRemoval::new(path.clone(), Arc::clone(&state)).arm(&scope, Duration::from_millis(1));
            if round % 2 == 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            scope.shutdown();
            tokio::time::timeout(Duration::from_secs(5), scope.wait())
                .await
                .unwrap();

            assert!(!path.exists());
            assert_eq!(state.get(), LifecycleState::Deleted);
            // A new file at the same path must survive: the removal is spent.
            std::fs::write(&path, b"new").unwrap();
            paths.push(path);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        for path in paths {
            assert_eq!(std::fs::read(&path).unwrap(), b"new");
        }
    }
}
