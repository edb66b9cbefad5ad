//! Pull stream over asynchronously fetched content.
//!
//! A producer (a [`FetchChannel`]) delivers the body as ordered chunks via
//! a [`FetchListener`]. Every callback is posted onto the shell task queue,
//! so the buffer only ever grows on the shell thread. `read` first waits
//! for the producer to finish: on the shell thread by pumping the queue,
//! elsewhere by parking on the completion event.

use std::io::Read;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use url::Url;

use crate::fetch::{FetchChannel, FetchError, FetchRequest};
use crate::sync::{ManualResetEvent, TaskQueue};

use super::{PullStream, StreamError, StreamStat, url_file_name};

/// Producer progress shared between the listener and the stream.
#[derive(Debug, Default)]
struct Progress {
    buffer: Vec<u8>,
    /// Terminal failure: start failure, chunk failure or error status.
    failure: Option<Failure>,
    finished: bool,
}

#[derive(Debug, Clone)]
enum Failure {
    Unavailable(String),
    Exhausted(String),
}

impl Failure {
    fn to_error(&self) -> StreamError {
        match self {
            Failure::Unavailable(reason) => StreamError::Unavailable(reason.clone()),
            Failure::Exhausted(reason) => StreamError::ResourceExhausted(reason.clone()),
        }
    }
}

impl Progress {
    fn fail(&mut self, reason: String) {
        self.fail_with(Failure::Unavailable(reason));
    }

    fn fail_with(&mut self, failure: Failure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }
}

/// Receives producer callbacks and replays them on the shell thread.
#[derive(Clone)]
pub struct FetchListener {
    progress: Arc<Mutex<Progress>>,
    completed: Arc<ManualResetEvent>,
    queue: TaskQueue,
    url: Arc<str>,
}

impl FetchListener {
    pub fn on_start(&self) {
        let url = Arc::clone(&self.url);
        self.dispatch(move |_| {
            tracing::trace!(url = %url, "content producer started");
        });
    }

    /// `count` bytes starting at `offset` are readable from `source`.
    pub fn on_chunk<R>(&self, offset: u64, source: R, count: usize)
    where
        R: Read + Send + 'static,
    {
        self.dispatch(move |listener| listener.append(offset, source, count));
    }

    pub fn on_complete(&self, status: Result<(), FetchError>) {
        self.dispatch(move |listener| {
            {
                let mut progress = listener.progress.lock();
                progress.finished = true;
                if let Err(e) = status {
                    progress.fail(format!("producer failed: {e}"));
                }
                tracing::debug!(
                    url = %listener.url,
                    bytes = progress.buffer.len(),
                    failed = progress.failure.is_some(),
                    "content producer completed"
                );
            }
            listener.completed.set();
        });
    }

    fn dispatch<F>(&self, task: F)
    where
        F: FnOnce(&FetchListener) + Send + 'static,
    {
        let listener = self.clone();
        if self.queue.post(move || task(&listener)).is_err() {
            // Shell loop gone: nobody will replay the callback, so end the
            // stream here rather than leave a reader parked forever.
            self.progress
                .lock()
                .fail("task queue closed before the producer finished".into());
            self.completed.set();
        }
    }

    /// Drain exactly `count` bytes of one chunk into the buffer.
    fn append<R: Read>(&self, offset: u64, mut source: R, count: usize) {
        let mut progress = self.progress.lock();
        if progress.failure.is_some() {
            return;
        }
        if progress.finished {
            tracing::debug!(url = %self.url, offset, count, "chunk after completion ignored");
            return;
        }
        let start = progress.buffer.len();
        if offset != start as u64 {
            progress.fail(format!(
                "chunk offset {offset} does not match buffered length {start}"
            ));
            drop(progress);
            self.completed.set();
            return;
        }

        if count == 0 {
            if let Err(e) = source.read(&mut []) {
                progress.fail(format!("empty chunk read failed: {e}"));
                drop(progress);
                self.completed.set();
            }
            return;
        }

        if let Err(e) = progress.buffer.try_reserve_exact(count) {
            progress.fail_with(Failure::Exhausted(format!(
                "cannot buffer a {count} byte chunk: {e}"
            )));
            drop(progress);
            self.completed.set();
            return;
        }
        progress.buffer.resize(start + count, 0);
        let mut filled = 0;
        while filled < count {
            match source.read(&mut progress.buffer[start + filled..start + count]) {
                Ok(0) => {
                    progress.buffer.truncate(start);
                    progress.fail(format!(
                        "producer stalled after {filled} of {count} chunk bytes"
                    ));
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    progress.buffer.truncate(start);
                    progress.fail(format!("chunk read failed: {e}"));
                    break;
                }
            }
        }
        if progress.failure.is_some() {
            drop(progress);
            self.completed.set();
        }
    }
}

/// Sequential read-only view of content produced asynchronously.
pub struct ContentStream {
    progress: Arc<Mutex<Progress>>,
    completed: Arc<ManualResetEvent>,
    queue: TaskQueue,
    url: Url,
    cursor: usize,
}

impl ContentStream {
    /// Start fetching `url` and return immediately.
    ///
    /// A producer that fails to start is not an error here: the failure
    /// is recorded and reported by the first `read` or `stat`.
    pub fn open(url: Url, fetcher: &dyn FetchChannel, queue: &TaskQueue) -> Self {
        let progress = Arc::new(Mutex::new(Progress::default()));
        let completed = Arc::new(ManualResetEvent::new());
        let listener = FetchListener {
            progress: Arc::clone(&progress),
            completed: Arc::clone(&completed),
            queue: queue.clone(),
            url: Arc::from(url.as_str()),
        };

        let request = FetchRequest { url: url.clone() };
        if let Err(e) = fetcher.open(&request, listener) {
            tracing::debug!(url = %url, error = %e, "content producer failed to start");
            let mut state = progress.lock();
            state.fail(format!("producer failed to start: {e}"));
            state.finished = true;
            drop(state);
            completed.set();
        }

        Self {
            progress,
            completed,
            queue: queue.clone(),
            url,
            cursor: 0,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Block until the producer reached a terminal state, then check that
    /// it produced something.
    fn wait_for_completion(&self) -> Result<(), StreamError> {
        if !self.completed.is_set() {
            if self.queue.is_owner_thread() {
                let completed = Arc::clone(&self.completed);
                self.queue.run_until(move || completed.is_set())?;
            } else {
                self.completed.wait();
            }
        }

        let progress = self.progress.lock();
        if let Some(failure) = &progress.failure {
            return Err(failure.to_error());
        }
        // A producer that reports success without a single byte is treated
        // as a failure.
        if progress.buffer.is_empty() {
            return Err(StreamError::Unavailable(
                "producer completed without content".into(),
            ));
        }
        Ok(())
    }
}

impl PullStream for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.wait_for_completion()?;
        let progress = self.progress.lock();
        let remaining = progress.buffer.get(self.cursor..).unwrap_or_default();
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }

    fn stat(&mut self, with_name: bool) -> Result<StreamStat, StreamError> {
        self.wait_for_completion()?;
        let name = if with_name {
            let name = url_file_name(&self.url).ok_or_else(|| {
                StreamError::Unavailable(format!("no file name in {}", self.url))
            })?;
            Some(name)
        } else {
            None
        };
        Ok(StreamStat {
            name,
            size: self.progress.lock().buffer.len() as u64,
            read_only: true,
            modified: SystemTime::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SeekOrigin, read_to_end};

    /// Producer that replays scripted callbacks from a background thread.
    enum Step {
        Chunk(u64, Vec<u8>),
        Short(u64, Vec<u8>, usize),
        Complete(Result<(), FetchError>),
    }

    struct Scripted {
        steps: Mutex<Option<Vec<Step>>>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(Some(steps)),
            }
        }
    }

    fn replay(listener: &FetchListener, steps: Vec<Step>) {
        listener.on_start();
        for step in steps {
            match step {
                Step::Chunk(offset, bytes) => {
                    let len = bytes.len();
                    listener.on_chunk(offset, std::io::Cursor::new(bytes), len);
                }
                Step::Short(offset, bytes, claimed) => {
                    listener.on_chunk(offset, std::io::Cursor::new(bytes), claimed);
                }
                Step::Complete(status) => listener.on_complete(status),
            }
        }
    }

    impl FetchChannel for Scripted {
        fn open(&self, _request: &FetchRequest, listener: FetchListener) -> Result<(), FetchError> {
            let steps = self.steps.lock().take().unwrap_or_default();
            std::thread::spawn(move || replay(&listener, steps));
            Ok(())
        }
    }

    /// Posts every callback before `open` returns.
    struct Inline(Scripted);

    impl FetchChannel for Inline {
        fn open(&self, _request: &FetchRequest, listener: FetchListener) -> Result<(), FetchError> {
            let steps = self.0.steps.lock().take().unwrap_or_default();
            replay(&listener, steps);
            Ok(())
        }
    }

    struct Refusing;

    impl FetchChannel for Refusing {
        fn open(&self, request: &FetchRequest, _listener: FetchListener) -> Result<(), FetchError> {
            Err(FetchError::UnsupportedScheme(request.url.scheme().to_string()))
        }
    }

    fn url() -> Url {
        Url::parse("file:///tmp/report%20final.txt").unwrap()
    }

    #[test]
    fn reads_partition_the_content() {
        let queue = TaskQueue::new();
        let data: Vec<u8> = (0..150u8).collect();
        let fetcher = Scripted::new(vec![
            Step::Chunk(0, data[..100].to_vec()),
            Step::Chunk(100, data[100..].to_vec()),
            Step::Complete(Ok(())),
        ]);
        let mut stream = ContentStream::open(url(), &fetcher, &queue);

        let mut buf = [0u8; 80];
        assert_eq!(stream.read(&mut buf).unwrap(), 80);
        assert_eq!(&buf[..], &data[..80]);
        assert_eq!(stream.read(&mut buf).unwrap(), 70);
        assert_eq!(&buf[..70], &data[80..]);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn empty_success_is_a_failure() {
        let queue = TaskQueue::new();
        let fetcher = Scripted::new(vec![Step::Complete(Ok(()))]);
        let mut stream = ContentStream::open(url(), &fetcher, &queue);

        let mut buf = [0u8; 16];
        assert!(matches!(
            stream.read(&mut buf),
            Err(StreamError::Unavailable(_))
        ));
        assert!(stream.stat(false).is_err());
    }

    #[test]
    fn error_status_fails_reads() {
        let queue = TaskQueue::new();
        let fetcher = Scripted::new(vec![
            Step::Chunk(0, b"partial".to_vec()),
            Step::Complete(Err(FetchError::Cancelled)),
        ]);
        let mut stream = ContentStream::open(url(), &fetcher, &queue);
        let mut buf = [0u8; 16];
        assert!(stream.read(&mut buf).is_err());
    }

    #[test]
    fn start_failure_surfaces_on_first_read() {
        let queue = TaskQueue::new();
        let mut stream = ContentStream::open(url(), &Refusing, &queue);
        let mut buf = [0u8; 4];
        match stream.read(&mut buf) {
            Err(StreamError::Unavailable(reason)) => assert!(reason.contains("start")),
            other => panic!("expected start failure, got {other:?}"),
        }
    }

    #[test]
    fn short_chunk_discards_its_bytes_and_fails() {
        let queue = TaskQueue::new();
        let fetcher = Scripted::new(vec![
            Step::Chunk(0, b"good".to_vec()),
            Step::Short(4, b"bad".to_vec(), 10),
            Step::Complete(Ok(())),
        ]);
        let mut stream = ContentStream::open(url(), &fetcher, &queue);
        let mut buf = [0u8; 32];
        assert!(stream.read(&mut buf).is_err());
        assert_eq!(stream.progress.lock().buffer, b"good");
    }

    #[test]
    fn out_of_order_chunk_fails_the_stream() {
        let queue = TaskQueue::new();
        let fetcher = Scripted::new(vec![
            Step::Chunk(0, b"abc".to_vec()),
            Step::Chunk(10, b"def".to_vec()),
            Step::Complete(Ok(())),
        ]);
        let mut stream = ContentStream::open(url(), &fetcher, &queue);
        let mut buf = [0u8; 32];
        match stream.read(&mut buf) {
            Err(StreamError::Unavailable(reason)) => assert!(reason.contains("offset")),
            other => panic!("expected offset failure, got {other:?}"),
        }
    }

    #[test]
    fn oversized_chunk_exhausts_instead_of_aborting() {
        let queue = TaskQueue::new();
        let fetcher = Scripted::new(vec![
            Step::Short(0, b"tiny".to_vec(), usize::MAX),
            Step::Complete(Ok(())),
        ]);
        let mut stream = ContentStream::open(url(), &fetcher, &queue);
        let mut buf = [0u8; 8];
        assert!(matches!(
            stream.read(&mut buf),
            Err(StreamError::ResourceExhausted(_))
        ));
        assert!(stream.progress.lock().buffer.is_empty());
    }

    #[test]
    fn chunks_after_completion_are_ignored() {
        let queue = TaskQueue::new();
        let fetcher = Inline(Scripted::new(vec![
            Step::Chunk(0, b"done".to_vec()),
            Step::Complete(Ok(())),
            Step::Chunk(4, b"late".to_vec()),
        ]));
        let mut stream = ContentStream::open(url(), &fetcher, &queue);
        assert_eq!(read_to_end(&mut stream).unwrap(), b"done");
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(stream.progress.lock().buffer, b"done");
    }

    #[test]
    fn zero_length_chunk_is_harmless() {
        let queue = TaskQueue::new();
        let fetcher = Scripted::new(vec![
            Step::Chunk(0, Vec::new()),
            Step::Chunk(0, b"xyz".to_vec()),
            Step::Complete(Ok(())),
        ]);
        let mut stream = ContentStream::open(url(), &fetcher, &queue);
        assert_eq!(read_to_end(&mut stream).unwrap(), b"xyz");
    }

    #[test]
    fn off_thread_reader_waits_for_shell_thread() {
        let queue = TaskQueue::new();
        let fetcher = Scripted::new(vec![
            Step::Chunk(0, b"from afar".to_vec()),
            Step::Complete(Ok(())),
        ]);
        let mut stream = ContentStream::open(url(), &fetcher, &queue);

        let reader = std::thread::spawn(move || read_to_end(&mut stream).unwrap());
        let shell = queue.clone();
        // The shell thread keeps pumping until the reader is done.
        shell.run_until(|| reader.is_finished()).unwrap();
        assert_eq!(reader.join().unwrap(), b"from afar");
    }

    #[test]
    fn stat_reports_unescaped_name_and_size() {
        let queue = TaskQueue::new();
        let fetcher = Scripted::new(vec![
            Step::Chunk(0, b"12345".to_vec()),
            Step::Complete(Ok(())),
        ]);
        let mut stream = ContentStream::open(url(), &fetcher, &queue);
        let stat = stream.stat(true).unwrap();
        assert_eq!(stat.name.as_deref(), Some("report final.txt"));
        assert_eq!(stat.size, 5);
        assert!(stat.read_only);
        assert_eq!(stream.stat(false).unwrap().name, None);
        assert_eq!(stream.seek(0, SeekOrigin::Set).unwrap(), 0);
    }
}
