//! Compute-once temporary artifact per transfer object.
//!
//! The shell asks for the same file path several times during one drag;
//! the artifact is produced on the first request and every later request
//! gets the same path.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use super::TransferError;

/// Upper bound on `stem-N.ext` attempts when names collide.
const MAX_UNIQUE_ATTEMPTS: u32 = 10_000;

#[derive(Debug)]
enum Slot {
    Empty,
    Computing(ThreadId),
    Ready(PathBuf),
    /// Handed over for deferred removal; the cache is closed.
    Detached,
}

#[derive(Debug)]
pub struct TempArtifactCache {
    slot: Mutex<Slot>,
    settled: Condvar,
}

impl Default for TempArtifactCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TempArtifactCache {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            settled: Condvar::new(),
        }
    }

    /// Return the cached path, running `compute` first if there is none.
    ///
    /// `compute` runs without the cache locked. A failing `compute` leaves
    /// the cache empty, so the next request retries. Another thread asking
    /// while a compute is in flight waits for its outcome.
    ///
    /// # Errors
    ///
    /// - The error returned by `compute`.
    /// - `ContentUnavailable` when called re-entrantly from inside the
    ///   in-flight compute on the same thread (e.g. while a stream read
    ///   pumps the shell queue), or after the cache was detached.
    pub fn get_or_create<F>(&self, compute: F) -> Result<PathBuf, TransferError>
    where
        F: FnOnce() -> Result<PathBuf, TransferError>,
    {
        let me = thread::current().id();
        {
            let mut slot = self.slot.lock();
            loop {
                match &*slot {
                    Slot::Ready(path) => return Ok(path.clone()),
                    Slot::Detached => {
                        return Err(TransferError::ContentUnavailable(
                            "transfer object already torn down".into(),
                        ));
                    }
                    Slot::Computing(owner) if *owner == me => {
                        return Err(TransferError::ContentUnavailable(
                            "temporary file is still being produced".into(),
                        ));
                    }
                    Slot::Computing(_) => self.settled.wait(&mut slot),
                    Slot::Empty => break,
                }
            }
            *slot = Slot::Computing(me);
        }

        let pending = PendingCompute { cache: self, owner: me };
        let result = compute();
        std::mem::forget(pending);

        let mut slot = self.slot.lock();
        let result = if matches!(*slot, Slot::Computing(owner) if owner == me) {
            *slot = match &result {
                Ok(path) => Slot::Ready(path.clone()),
                Err(_) => Slot::Empty,
            };
            result
        } else {
            // Detached mid-compute: nobody would remove this file later.
            if let Ok(path) = &result {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::debug!(path = %path.display(), error = %e, "orphaned temporary file left behind");
                }
            }
            result.and(Err(TransferError::ContentUnavailable(
                "transfer object torn down while producing".into(),
            )))
        };
        self.settled.notify_all();
        result
    }

    pub fn path(&self) -> Option<PathBuf> {
        match &*self.slot.lock() {
            Slot::Ready(path) => Some(path.clone()),
            _ => None,
        }
    }

    /// Close the cache and hand over its path, if one was produced.
    pub fn detach(&self) -> Option<PathBuf> {
        let mut slot = self.slot.lock();
        let previous = std::mem::replace(&mut *slot, Slot::Detached);
        self.settled.notify_all();
        match previous {
            Slot::Ready(path) => Some(path),
            _ => None,
        }
    }
}

/// Resets an in-flight slot if `compute` unwinds, so waiters do not park
/// forever.
struct PendingCompute<'a> {
    cache: &'a TempArtifactCache,
    owner: ThreadId,
}

impl Drop for PendingCompute<'_> {
    fn drop(&mut self) {
        let mut slot = self.cache.slot.lock();
        if matches!(*slot, Slot::Computing(owner) if owner == self.owner) {
            *slot = Slot::Empty;
        }
        self.cache.settled.notify_all();
    }
}

/// Create `name` in `dir` without clobbering anything, falling back to
/// `stem-1.ext`, `stem-2.ext`, ...
pub fn create_unique(dir: &Path, name: &str) -> io::Result<(File, PathBuf)> {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    for attempt in 0..MAX_UNIQUE_ATTEMPTS {
        let candidate = if attempt == 0 {
            name.to_string()
        } else {
            format!("{stem}-{attempt}{ext}")
        };
        let path = dir.join(candidate);
        match open_new(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {name} in {}", dir.display()),
    ))
}

fn open_new(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o660);
    }
    options.open(path)
}

/// Random 8-character file name with extension `ext` (including the dot).
pub fn random_name(ext: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{ext}", &id[..8])
}
