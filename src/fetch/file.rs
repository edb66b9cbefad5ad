//! `file:` URL producer.

use std::path::PathBuf;

use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;

use super::{FetchChannel, FetchError, FetchListener, FetchRequest};

/// Default chunk size for file reads.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Reads local files on the tokio runtime and reports them chunk by chunk.
#[derive(Debug, Clone)]
pub struct FileFetchChannel {
    runtime: Handle,
    chunk_size: usize,
}

impl FileFetchChannel {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl FetchChannel for FileFetchChannel {
    fn open(&self, request: &FetchRequest, listener: FetchListener) -> Result<(), FetchError> {
        if request.url.scheme() != "file" {
            return Err(FetchError::UnsupportedScheme(
                request.url.scheme().to_string(),
            ));
        }
        let path = request
            .url
            .to_file_path()
            .map_err(|()| FetchError::NotAFile(request.url.to_string()))?;
        // Fail at start for a missing file, as a real channel would on open.
        std::fs::metadata(&path)?;

        let chunk_size = self.chunk_size;
        self.runtime.spawn(async move {
            listener.on_start();
            let status = pump(path, chunk_size, &listener).await;
            if let Err(e) = &status {
                tracing::warn!(error = %e, "file fetch failed");
            }
            listener.on_complete(status);
        });
        Ok(())
    }
}

async fn pump(path: PathBuf, chunk_size: usize, listener: &FetchListener) -> Result<(), FetchError> {
    let mut file = tokio::fs::File::open(&path).await?;
    let mut buf = vec![0u8; chunk_size];
    let mut offset = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        listener.on_chunk(offset, std::io::Cursor::new(buf[..n].to_vec()), n);
        offset += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ContentStream, PullStream, StreamError, read_to_end};
    use crate::sync::TaskQueue;
    use url::Url;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streams_file_in_small_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let channel = FileFetchChannel::new(Handle::current()).with_chunk_size(512);
        let url = Url::from_file_path(&path).unwrap();

        let read = tokio::task::spawn_blocking(move || {
            let queue = TaskQueue::new();
            let mut stream = ContentStream::open(url, &channel, &queue);
            read_to_end(&mut stream).unwrap()
        })
        .await
        .unwrap();
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn missing_file_fails_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("absent.txt")).unwrap();
        let channel = FileFetchChannel::new(Handle::current());

        let queue = TaskQueue::new();
        let mut stream = ContentStream::open(url, &channel, &queue);
        let mut buf = [0u8; 4];
        assert!(matches!(
            stream.read(&mut buf),
            Err(StreamError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn other_schemes_are_refused() {
        let channel = FileFetchChannel::new(Handle::current());
        let queue = TaskQueue::new();
        let url = Url::parse("https://example.com/a.txt").unwrap();
        let mut stream = ContentStream::open(url, &channel, &queue);
        let mut buf = [0u8; 4];
        match stream.read(&mut buf) {
            Err(StreamError::Unavailable(reason)) => assert!(reason.contains("scheme")),
            other => panic!("expected scheme refusal, got {other:?}"),
        }
    }
}
