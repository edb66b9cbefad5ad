//! Synchronous pull streams handed to the shell.
//!
//! Both implementations are read-only, sequential, and support only the
//! zero-offset "rewind/tell" seeks the shell issues before reading.

pub mod content;
pub mod memory;

use std::time::SystemTime;

pub use content::{ContentStream, FetchListener};
pub use memory::SharedMemoryStream;

use crate::sync::QueueError;

/// Stream operation errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("content unavailable: {0}")]
    Unavailable(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("stream operation not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("task queue: {0}")]
    Queue(#[from] QueueError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Set,
    Cur,
    End,
}

/// Metadata reported by [`PullStream::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStat {
    /// Absent when the caller asked for no name.
    pub name: Option<String>,
    pub size: u64,
    pub read_only: bool,
    pub modified: SystemTime,
}

/// Shell-facing stream surface.
pub trait PullStream: Send {
    /// Copy up to `buf.len()` bytes from the cursor. `Ok(0)` means end.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    fn stat(&mut self, with_name: bool) -> Result<StreamStat, StreamError>;

    /// Only `seek(0, Set | Cur)` is supported; it is a no-op reporting
    /// position 0.
    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64, StreamError> {
        match (offset, origin) {
            (0, SeekOrigin::Set | SeekOrigin::Cur) => Ok(0),
            _ => Err(StreamError::NotImplemented("seek")),
        }
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, StreamError> {
        Err(StreamError::NotImplemented("write"))
    }

    fn set_size(&mut self, _size: u64) -> Result<(), StreamError> {
        Err(StreamError::NotImplemented("set_size"))
    }

    fn copy_to(&mut self, _target: &mut dyn PullStream, _len: u64) -> Result<u64, StreamError> {
        Err(StreamError::NotImplemented("copy_to"))
    }

    fn commit(&mut self) -> Result<(), StreamError> {
        Err(StreamError::NotImplemented("commit"))
    }

    fn revert(&mut self) -> Result<(), StreamError> {
        Err(StreamError::NotImplemented("revert"))
    }

    fn lock_region(&mut self, _offset: u64, _len: u64) -> Result<(), StreamError> {
        Err(StreamError::NotImplemented("lock_region"))
    }

    fn unlock_region(&mut self, _offset: u64, _len: u64) -> Result<(), StreamError> {
        Err(StreamError::NotImplemented("unlock_region"))
    }

    fn clone_stream(&self) -> Result<Box<dyn PullStream>, StreamError> {
        Err(StreamError::NotImplemented("clone"))
    }
}

/// Drain `stream` from its cursor to the end.
pub fn read_to_end(stream: &mut dyn PullStream) -> Result<Vec<u8>, StreamError> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

/// Last path segment of `url`, percent-decoded.
pub fn url_file_name(url: &url::Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let decoded = urlencoding::decode_binary(segment.as_bytes());
    if decoded.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&decoded).into_owned())
    }
}
