//! Shared memory regions guarded by one process-wide lock.
//!
//! Every region in the process shares a single readers/exclusive lock.
//! Stream reads and producer writes take it exclusively for the duration
//! of one copy; inspection (length, snapshot) takes it shared.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

static REGION_LOCK: RwLock<()> = parking_lot::const_rwlock(());

/// Take the process-wide region lock exclusively.
pub fn lock_exclusive() -> RwLockWriteGuard<'static, ()> {
    REGION_LOCK.write()
}

/// Take the process-wide region lock shared.
pub fn lock_shared() -> RwLockReadGuard<'static, ()> {
    REGION_LOCK.read()
}

/// Fixed-length byte region shared between a producer and its readers.
#[derive(Debug, Clone)]
pub struct SharedRegion {
    bytes: Arc<Mutex<Box<[u8]>>>,
}

impl SharedRegion {
    /// Allocate a zeroed region of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0u8; len].into_boxed_slice())),
        }
    }

    /// Allocate a region holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        let region = Self::zeroed(data.len());
        region.write_at(0, data);
        region
    }

    pub fn len(&self) -> usize {
        let _shared = lock_shared();
        self.bytes.lock().len()
    }

    /// Write `data` at `offset`, clipped to the region end. Returns the
    /// number of bytes written.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> usize {
        let _exclusive = lock_exclusive();
        let mut bytes = self.bytes.lock();
        copy_clipped(data, bytes.get_mut(offset..).unwrap_or_default())
    }

    /// Copy from `offset` into `out`, bounded by `limit` (the logical
    /// length) and the region end. Caller holds the exclusive lock.
    pub fn copy_out_locked(
        &self,
        _guard: &RwLockWriteGuard<'static, ()>,
        offset: usize,
        limit: usize,
        out: &mut [u8],
    ) -> usize {
        let bytes = self.bytes.lock();
        let end = limit.min(bytes.len());
        match bytes.get(offset..end) {
            Some(available) => copy_clipped(available, out),
            None => 0,
        }
    }

    /// Copy of the whole region.
    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<u8> {
        let _shared = lock_shared();
        self.bytes.lock().to_vec()
    }
}

fn copy_clipped(src: &[u8], dst: &mut [u8]) -> usize {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_copy_out() {
        let region = SharedRegion::zeroed(8);
        assert_eq!(region.write_at(2, b"abcd"), 4);
        let guard = lock_exclusive();
        let mut out = [0u8; 8];
        let n = region.copy_out_locked(&guard, 0, 8, &mut out);
        drop(guard);
        assert_eq!(n, 8);
        assert_eq!(&out, b"\0\0abcd\0\0");
    }

    #[test]
    fn write_is_clipped_at_region_end() {
        let region = SharedRegion::zeroed(4);
        assert_eq!(region.write_at(2, b"xyz"), 2);
        assert_eq!(region.write_at(9, b"q"), 0);
        assert_eq!(region.snapshot(), b"\0\0xy");
    }

    #[test]
    fn copy_out_respects_logical_limit() {
        let region = SharedRegion::from_slice(b"hello world");
        let guard = lock_exclusive();
        let mut out = [0u8; 32];
        assert_eq!(region.copy_out_locked(&guard, 6, 9, &mut out), 3);
        assert_eq!(&out[..3], b"wor");
        assert_eq!(region.copy_out_locked(&guard, 12, 11, &mut out), 0);
    }
}
