//! Delivery media returned by `get_data` and stored by `set_data`.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::format::MediumKinds;
use crate::stream::{self, PullStream, StreamError};

/// Shared handle to a pull stream. Cloning shares the cursor.
pub type StreamHandle = Arc<Mutex<Box<dyn PullStream>>>;

/// A delivered payload.
///
/// Cloning shares the underlying resource; [`Medium::deep_copy`] duplicates
/// memory payloads.
#[derive(Clone)]
pub enum Medium {
    Memory(Bytes),
    Stream(StreamHandle),
    Storage(Arc<[u8]>),
}

impl std::fmt::Debug for Medium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Medium::Memory(bytes) => f.debug_tuple("Memory").field(&bytes.len()).finish(),
            Medium::Stream(_) => f.write_str("Stream(..)"),
            Medium::Storage(data) => f.debug_tuple("Storage").field(&data.len()).finish(),
        }
    }
}

impl Medium {
    pub fn stream<S: PullStream + 'static>(stream: S) -> Self {
        Medium::Stream(Arc::new(Mutex::new(Box::new(stream))))
    }

    pub fn kind(&self) -> MediumKinds {
        match self {
            Medium::Memory(_) => MediumKinds::MEMORY,
            Medium::Stream(_) => MediumKinds::STREAM,
            Medium::Storage(_) => MediumKinds::STORAGE,
        }
    }

    /// Duplicate memory payloads; stream and storage handles stay shared.
    pub fn deep_copy(&self) -> Self {
        match self {
            Medium::Memory(bytes) => Medium::Memory(Bytes::copy_from_slice(bytes)),
            Medium::Stream(handle) => Medium::Stream(Arc::clone(handle)),
            Medium::Storage(data) => Medium::Storage(Arc::clone(data)),
        }
    }

    /// A medium to hand to one consumer. Clonable streams get their own
    /// cursor at the start; other streams stay shared.
    pub fn fresh_view(&self) -> Self {
        match self {
            Medium::Stream(handle) => match handle.lock().clone_stream() {
                Ok(stream) => Medium::Stream(Arc::new(Mutex::new(stream))),
                Err(_) => Medium::Stream(Arc::clone(handle)),
            },
            other => other.clone(),
        }
    }

    /// Materialize the payload, draining a stream from its current cursor.
    pub fn read_all(&self) -> Result<Vec<u8>, StreamError> {
        match self {
            Medium::Memory(bytes) => Ok(bytes.to_vec()),
            Medium::Storage(data) => Ok(data.to_vec()),
            Medium::Stream(handle) => {
                let mut stream = handle.lock();
                stream::read_to_end(stream.as_mut())
            }
        }
    }
}
