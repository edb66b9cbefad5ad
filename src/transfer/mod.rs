//! The content-transfer object.
//!
//! A [`TransferObject`] exposes one [`ContentSource`] to the shell through
//! a strictly synchronous pull interface. Formats are negotiated through
//! the object's [`FormatRegistry`]; content that needs asynchronous work
//! (a fetch, re-encoding, a temporary file) is produced on demand and
//! bridged back through the shell task queue.
//!
//! All methods are meant to be called from tasks on the shell thread.

pub mod cache;
pub mod cleanup;
pub mod filename;
pub mod layout;
pub mod lifetime;
mod produce;
mod setup;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::encode::{EncodeError, ImageEncoder};
use crate::fetch::FetchChannel;
use crate::format::{ArbitraryLookup, BuiltinMatch, Direction, FormatRegistry, FormatSpec};
use crate::icon::IconCache;
use crate::medium::Medium;
use crate::source::ContentSource;
use crate::stream::StreamError;
use crate::sync::TaskQueue;

pub use cache::TempArtifactCache;
pub use cleanup::{CleanupScope, DeferredRemoval};
pub use lifetime::{Counted, LifecycleState, Lifetime};

/// Errors returned to the shell. Each maps to a wire reason string.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("format not supported")]
    FormatNotSupported,
    #[error("format offered on a different medium")]
    MediumMismatch,
    #[error("content unavailable: {0}")]
    ContentUnavailable(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
}

impl TransferError {
    pub fn reason(&self) -> &'static str {
        match self {
            TransferError::FormatNotSupported => "format_not_supported",
            TransferError::MediumMismatch => "medium_mismatch",
            TransferError::ContentUnavailable(_) => "content_unavailable",
            TransferError::ResourceExhausted(_) => "resource_exhausted",
            TransferError::NotImplemented(_) => "not_implemented",
        }
    }
}

impl From<StreamError> for TransferError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::NotImplemented(op) => TransferError::NotImplemented(op),
            StreamError::ResourceExhausted(reason) => TransferError::ResourceExhausted(reason),
            StreamError::Io(io) => io.into(),
            other => TransferError::ContentUnavailable(other.to_string()),
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::StorageFull | io::ErrorKind::OutOfMemory => {
                TransferError::ResourceExhausted(e.to_string())
            }
            _ => TransferError::ContentUnavailable(e.to_string()),
        }
    }
}

impl From<EncodeError> for TransferError {
    fn from(e: EncodeError) -> Self {
        TransferError::ContentUnavailable(e.to_string())
    }
}

/// File type used when an image is dropped as a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ImageFileFormat {
    #[default]
    Png,
    Bmp,
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Delay between teardown and temp-file removal.
    pub cleanup_grace: Duration,
    pub image_file_format: ImageFileFormat,
    /// Add favicon lines to internet-shortcut contents.
    pub shortcut_favicons: bool,
    /// Where dropped files are materialized.
    pub temp_dir: PathBuf,
    /// Read size when copying a stream into a temp file.
    pub copy_chunk: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            cleanup_grace: Duration::from_millis(500),
            image_file_format: ImageFileFormat::Png,
            shortcut_favicons: true,
            temp_dir: std::env::temp_dir().join("xferd"),
            copy_chunk: 512,
        }
    }
}

/// Collaborators shared by every transfer object of a daemon.
#[derive(Clone)]
pub struct Services {
    pub queue: TaskQueue,
    pub fetcher: Arc<dyn FetchChannel>,
    pub encoder: Arc<dyn ImageEncoder>,
    pub icons: Arc<dyn IconCache>,
    pub cleanup: CleanupScope,
}

/// Unique identifier for a transfer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ObjectId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct AsyncOperation {
    supported: bool,
    in_operation: bool,
}

pub struct TransferObject {
    id: ObjectId,
    lifetime: Lifetime<TransferObject>,
    registry: Mutex<FormatRegistry>,
    temp: TempArtifactCache,
    source: Arc<dyn ContentSource>,
    source_url: Mutex<Option<String>>,
    async_op: Mutex<AsyncOperation>,
    config: Arc<TransferConfig>,
    services: Services,
}

impl std::fmt::Debug for TransferObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferObject")
            .field("id", &self.id)
            .field("lifetime", &self.lifetime)
            .field("temp", &self.temp.path())
            .finish_non_exhaustive()
    }
}

impl TransferObject {
    /// Build an object for `source` with its formats registered, and no
    /// references taken yet.
    pub fn new(
        source: Arc<dyn ContentSource>,
        config: Arc<TransferConfig>,
        services: Services,
    ) -> Arc<Self> {
        let registry = setup::registry_for(source.as_ref());
        let object = Arc::new(Self {
            id: ObjectId::next(),
            lifetime: Lifetime::new(),
            registry: Mutex::new(registry),
            temp: TempArtifactCache::new(),
            source,
            source_url: Mutex::new(None),
            async_op: Mutex::new(AsyncOperation {
                supported: true,
                in_operation: false,
            }),
            config,
            services,
        });
        tracing::debug!(object = %object.id, "transfer object created");
        object
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.lifetime.state()
    }

    /// URL of the page the content came from; used in the HTML header.
    pub fn set_source_url(&self, url: Option<String>) {
        *self.source_url.lock() = url;
    }

    pub fn add_ref(self: &Arc<Self>) -> u32 {
        lifetime::add_ref(self)
    }

    pub fn release(self: &Arc<Self>) -> u32 {
        lifetime::release(self)
    }

    /// Current reference count, including the keep-alive reference.
    pub fn ref_count(&self) -> u32 {
        self.lifetime.count()
    }

    /// Render the content in the requested format.
    ///
    /// Consumer-stored formats win over built-ins. The registry is not
    /// locked while content is produced.
    pub fn get_data(&self, spec: &FormatSpec) -> Result<Medium, TransferError> {
        let (entry, arbitrary_mismatch) = {
            let registry = self.registry.lock();
            let arbitrary = registry.find_arbitrary(spec);
            if let ArbitraryLookup::Found(idx) = arbitrary {
                if let Some(medium) = registry.arbitrary(idx).and_then(|e| e.medium.as_ref()) {
                    return Ok(medium.fresh_view());
                }
            }
            match registry.match_builtin(spec) {
                BuiltinMatch::Matched(entry) => (Some(entry.clone()), false),
                BuiltinMatch::MediumMismatch => return Err(TransferError::MediumMismatch),
                BuiltinMatch::NotFound => {
                    (None, arbitrary == ArbitraryLookup::MediumMismatch)
                }
            }
        };
        match entry {
            Some(entry) => self.produce(&entry, spec),
            None if arbitrary_mismatch => Err(TransferError::MediumMismatch),
            None => Err(TransferError::FormatNotSupported),
        }
    }

    /// Whether [`TransferObject::get_data`] would find a producer for
    /// `spec`. Has no side effects.
    pub fn query_get_data(&self, spec: &FormatSpec) -> bool {
        let registry = self.registry.lock();
        if let ArbitraryLookup::Found(idx) = registry.find_arbitrary(spec) {
            if registry.arbitrary(idx).is_some_and(|e| e.medium.is_some()) {
                return true;
            }
        }
        matches!(registry.match_builtin(spec), BuiltinMatch::Matched(_))
    }

    /// Store a consumer-provided medium under `spec`.
    ///
    /// The previous medium for the same format is released first. Without
    /// `take_ownership` a private copy is stored.
    pub fn set_data(
        &self,
        spec: &FormatSpec,
        medium: Medium,
        take_ownership: bool,
    ) -> Result<(), TransferError> {
        let medium = if take_ownership {
            medium
        } else {
            medium.deep_copy()
        };
        let previous = {
            let mut registry = self.registry.lock();
            match registry.lookup_arbitrary(spec, true) {
                ArbitraryLookup::Found(idx) => registry.store_medium(idx, medium),
                _ => {
                    return Err(TransferError::ResourceExhausted(
                        "format entry could not be created".into(),
                    ));
                }
            }
        };
        drop(previous);
        tracing::debug!(object = %self.id, format = spec.format, "consumer data stored");
        Ok(())
    }

    /// Formats offered, in registration order.
    pub fn enum_formats(&self, direction: Direction) -> Result<Vec<FormatSpec>, TransferError> {
        self.registry
            .lock()
            .enumerate(direction)
            .map(<[FormatSpec]>::to_vec)
            .ok_or(TransferError::NotImplemented("enum_formats for set"))
    }

    pub fn get_data_here(&self, _spec: &FormatSpec) -> Result<Medium, TransferError> {
        Err(TransferError::NotImplemented("get_data_here"))
    }

    pub fn canonical_format(&self, _spec: &FormatSpec) -> Result<FormatSpec, TransferError> {
        Err(TransferError::NotImplemented("canonical_format"))
    }

    pub fn advise(&self, _spec: &FormatSpec) -> Result<u32, TransferError> {
        Err(TransferError::NotImplemented("advise"))
    }

    pub fn unadvise(&self, _connection: u32) -> Result<(), TransferError> {
        Err(TransferError::NotImplemented("unadvise"))
    }

    pub fn enum_advise(&self) -> Result<Vec<u32>, TransferError> {
        Err(TransferError::NotImplemented("enum_advise"))
    }

    pub fn set_async_mode(&self, supported: bool) {
        self.async_op.lock().supported = supported;
    }

    pub fn async_mode(&self) -> bool {
        self.async_op.lock().supported
    }

    pub fn start_operation(&self) {
        self.async_op.lock().in_operation = true;
    }

    pub fn in_operation(&self) -> bool {
        self.async_op.lock().in_operation
    }

    pub fn end_operation(&self) {
        self.async_op.lock().in_operation = false;
    }
}

impl Counted for TransferObject {
    fn lifetime(&self) -> &Lifetime<Self> {
        &self.lifetime
    }

    fn shell_queue(&self) -> &TaskQueue {
        &self.services.queue
    }

    fn teardown(self: Arc<Self>) {
        match self.temp.detach() {
            Some(path) => {
                tracing::debug!(object = %self.id, path = %path.display(), "temporary file scheduled for removal");
                DeferredRemoval::new(path, self.lifetime.state_cell())
                    .arm(&self.services.cleanup, self.config.cleanup_grace);
            }
            None => {
                self.lifetime.state_cell().mark_deleted();
            }
        }
        tracing::debug!(object = %self.id, "transfer object torn down");
    }
}

impl Drop for TransferObject {
    fn drop(&mut self) {
        // Never torn down (no reference was ever taken): nobody can still
        // be reading the file.
        if let Some(path) = self.temp.detach() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "temporary file removal failed");
            }
        }
    }
}
