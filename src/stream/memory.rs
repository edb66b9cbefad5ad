//! Pull stream over a shared memory region.

use std::sync::Arc;
use std::time::SystemTime;

use crate::sync::{ManualResetEvent, SharedRegion, TaskQueue, region};

use super::{PullStream, StreamError, StreamStat};

/// Reads a [`SharedRegion`] of known length, optionally after waiting for a
/// background producer (the icon cache) to signal completion.
pub struct SharedMemoryStream {
    region: SharedRegion,
    total_len: usize,
    completion: Option<Arc<ManualResetEvent>>,
    queue: TaskQueue,
    cursor: usize,
}

impl SharedMemoryStream {
    pub fn new(
        region: SharedRegion,
        total_len: usize,
        completion: Option<Arc<ManualResetEvent>>,
        queue: &TaskQueue,
    ) -> Self {
        Self {
            region,
            total_len,
            completion,
            queue: queue.clone(),
            cursor: 0,
        }
    }

    /// Off the shell thread, block until the producer signals. On the shell
    /// thread blocking would stall the producer's completion, so the event
    /// is signalled instead and the read proceeds immediately.
    fn wait_for_completion(&self) {
        let Some(event) = &self.completion else {
            return;
        };
        if self.queue.is_owner_thread() {
            event.set();
        } else {
            event.wait();
        }
    }
}

impl PullStream for SharedMemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.wait_for_completion();
        let guard = region::lock_exclusive();
        let n = self
            .region
            .copy_out_locked(&guard, self.cursor, self.total_len, buf);
        drop(guard);
        self.cursor += n;
        Ok(n)
    }

    fn stat(&mut self, _with_name: bool) -> Result<StreamStat, StreamError> {
        Ok(StreamStat {
            name: Some(String::new()),
            size: self.total_len as u64,
            read_only: true,
            modified: SystemTime::now(),
        })
    }

    /// A new reader over the same region, positioned at the start.
    fn clone_stream(&self) -> Result<Box<dyn PullStream>, StreamError> {
        Ok(Box::new(SharedMemoryStream::new(
            self.region.clone(),
            self.total_len,
            self.completion.clone(),
            &self.queue,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_end;
    use std::time::Duration;

    #[test]
    fn reads_whole_region_without_event() {
        let queue = TaskQueue::new();
        let region = SharedRegion::from_slice(b"[InternetShortcut]\r\n");
        let mut stream = SharedMemoryStream::new(region, 20, None, &queue);
        assert_eq!(read_to_end(&mut stream).unwrap(), b"[InternetShortcut]\r\n");
    }

    #[test]
    fn foreground_read_does_not_block_on_unfired_event() {
        let queue = TaskQueue::new();
        let event = Arc::new(ManualResetEvent::new());
        let region = SharedRegion::from_slice(b"abc");
        let mut stream = SharedMemoryStream::new(region, 3, Some(Arc::clone(&event)), &queue);

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert!(event.is_set());
    }

    #[test]
    fn background_read_waits_for_event() {
        let queue = TaskQueue::new();
        let event = Arc::new(ManualResetEvent::new());
        let region = SharedRegion::from_slice(b"late");
        let mut stream = SharedMemoryStream::new(region, 4, Some(Arc::clone(&event)), &queue);

        let reader = std::thread::spawn(move || read_to_end(&mut stream).unwrap());
        std::thread::sleep(Duration::from_millis(30));
        assert!(!reader.is_finished());
        event.set();
        assert_eq!(reader.join().unwrap(), b"late");
    }

    #[test]
    fn clones_read_independently() {
        let queue = TaskQueue::new();
        let region = SharedRegion::from_slice(b"shared");
        let mut first = SharedMemoryStream::new(region, 6, None, &queue);
        assert_eq!(read_to_end(&mut first).unwrap(), b"shared");

        let mut second = first.clone_stream().unwrap();
        assert_eq!(read_to_end(second.as_mut()).unwrap(), b"shared");
        assert_eq!(read_to_end(&mut first).unwrap(), b"");
    }

    #[test]
    fn read_is_bounded_by_total_length() {
        let queue = TaskQueue::new();
        let region = SharedRegion::from_slice(b"0123456789");
        let mut stream = SharedMemoryStream::new(region, 4, None, &queue);
        assert_eq!(read_to_end(&mut stream).unwrap(), b"0123");
        let stat = stream.stat(true).unwrap();
        assert_eq!(stat.size, 4);
        assert_eq!(stat.name.as_deref(), Some(""));
    }
}
