//! Content sources: what the user copied or is dragging, keyed by flavor.

use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;

/// MIME-like flavor names understood by the transfer object.
pub mod flavors {
    pub const TEXT: &str = "text/plain";
    pub const HTML: &str = "text/html";
    /// `"<url>\n<title>"`.
    pub const URL: &str = "text/x-moz-url";
    pub const URL_DATA: &str = "text/x-moz-url-data";
    pub const URL_PRIVATE: &str = "text/x-moz-url-priv";
    pub const FILE: &str = "application/x-moz-file";
    pub const FILE_PROMISE: &str = "application/x-moz-file-promise";
    pub const FILE_PROMISE_URL: &str = "application/x-moz-file-promise-url";
    pub const FILE_PROMISE_DEST_FILENAME: &str = "application/x-moz-file-promise-dest-filename";
    pub const NATIVE_IMAGE: &str = "application/x-moz-nativeimage";
    pub const CUSTOM: &str = "application/x-moz-custom-clipdata";
    /// Page icon used for internet shortcuts.
    pub const FAVICON: &str = "image/x-icon";
}

/// One flavor's data.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Image(Arc<DynamicImage>),
    File(PathBuf),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Arc<DynamicImage>> {
        match self {
            Payload::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&PathBuf> {
        match self {
            Payload::File(path) => Some(path),
            _ => None,
        }
    }
}

/// Read-only view of the transferred content.
pub trait ContentSource: Send + Sync {
    /// Offered flavors, most preferred first.
    fn flavors(&self) -> Vec<String>;

    fn payload(&self, flavor: &str) -> Option<Payload>;

    fn has_flavor(&self, flavor: &str) -> bool {
        self.flavors().iter().any(|f| f == flavor)
    }
}

/// In-memory source filled from an offer.
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    entries: Vec<(String, Payload)>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace `flavor`, keeping the first insertion position.
    pub fn insert(&mut self, flavor: impl Into<String>, payload: Payload) {
        let flavor = flavor.into();
        match self.entries.iter_mut().find(|(f, _)| *f == flavor) {
            Some(entry) => entry.1 = payload,
            None => self.entries.push((flavor, payload)),
        }
    }

    pub fn with(mut self, flavor: impl Into<String>, payload: Payload) -> Self {
        self.insert(flavor, payload);
        self
    }
}

impl ContentSource for StaticSource {
    fn flavors(&self) -> Vec<String> {
        self.entries.iter().map(|(f, _)| f.clone()).collect()
    }

    fn payload(&self, flavor: &str) -> Option<Payload> {
        self.entries
            .iter()
            .find(|(f, _)| f == flavor)
            .map(|(_, p)| p.clone())
    }
}
