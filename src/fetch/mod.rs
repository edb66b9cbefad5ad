//! Content producers feeding [`ContentStream`](crate::stream::ContentStream).
//!
//! Network transport is out of scope: the only shipped channel serves
//! `file:` URLs from the tokio runtime. Other schemes fail to start, and
//! the failure surfaces on the stream's first read.

pub mod file;

use url::Url;

pub use crate::stream::FetchListener;
pub use file::FileFetchChannel;

/// Fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("URL does not name a local file: {0}")]
    NotAFile(String),
    #[error("fetch cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
}

/// Starts a producer that reports through `listener`.
pub trait FetchChannel: Send + Sync {
    /// Begin fetching. Returns once the producer is running; every later
    /// outcome is reported through the listener.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` when the producer cannot be started.
    fn open(&self, request: &FetchRequest, listener: FetchListener) -> Result<(), FetchError>;
}
