//! Favicon cache for internet-shortcut files.
//!
//! Shortcut contents name an `.ico` path before the icon exists; the
//! cache writes it in the background and drops the caller's
//! [`CompletionGuard`] when done, which releases any reader waiting on it.

use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use tokio::runtime::Handle;
use url::Url;

use crate::encode::{ImageEncoder, MIME_ICO};
use crate::sync::CompletionGuard;

pub trait IconCache: Send + Sync {
    /// Where the icon for `page` lives (or will live).
    fn icon_path(&self, page: &Url) -> PathBuf;

    /// Ensure the icon file exists, dropping `guard` once it does (or once
    /// producing it failed).
    fn obtain(&self, page: &Url, favicon: Option<Arc<DynamicImage>>, guard: CompletionGuard);
}

/// Icons stored as `<dir>/<blake3(url)>.ico`.
pub struct DiskIconCache {
    dir: PathBuf,
    encoder: Arc<dyn ImageEncoder>,
    runtime: Handle,
}

impl DiskIconCache {
    pub fn new(dir: PathBuf, encoder: Arc<dyn ImageEncoder>, runtime: Handle) -> Self {
        Self {
            dir,
            encoder,
            runtime,
        }
    }
}

impl IconCache for DiskIconCache {
    fn icon_path(&self, page: &Url) -> PathBuf {
        let digest = blake3::hash(page.as_str().as_bytes());
        self.dir.join(format!("{}.ico", digest.to_hex()))
    }

    fn obtain(&self, page: &Url, favicon: Option<Arc<DynamicImage>>, guard: CompletionGuard) {
        let path = self.icon_path(page);
        if path.exists() {
            return;
        }
        let Some(favicon) = favicon else {
            tracing::debug!(page = %page, "no favicon offered");
            return;
        };

        let dir = self.dir.clone();
        let encoder = Arc::clone(&self.encoder);
        self.runtime.spawn_blocking(move || {
            let written = encoder
                .encode(&*favicon, MIME_ICO, "")
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
                    std::fs::write(&path, bytes).map_err(|e| e.to_string())
                });
            match written {
                Ok(()) if guard.is_waiting() => {
                    tracing::debug!(path = %path.display(), "favicon cached");
                }
                Ok(()) => {
                    // The shortcut was already handed out; the shell has to
                    // re-read icons to pick this one up.
                    tracing::info!(path = %path.display(), "favicon cached late, shell icon refresh needed");
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "favicon cache failed"),
            }
            drop(guard);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::CodecImageEncoder;
    use crate::sync::ManualResetEvent;

    fn cache(dir: &std::path::Path) -> DiskIconCache {
        DiskIconCache::new(dir.to_path_buf(), Arc::new(CodecImageEncoder), Handle::current())
    }

    #[tokio::test]
    async fn writes_icon_and_signals() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let page = Url::parse("https://example.com/").unwrap();
        let event = Arc::new(ManualResetEvent::new());
        let favicon = Arc::new(DynamicImage::ImageRgba8(image::RgbaImage::new(16, 16)));

        cache.obtain(&page, Some(favicon), CompletionGuard::new(Arc::clone(&event)));
        let signalled = tokio::task::spawn_blocking({
            let event = Arc::clone(&event);
            move || event.wait_timeout(std::time::Duration::from_secs(5))
        })
        .await
        .unwrap();

        assert!(signalled);
        assert!(cache.icon_path(&page).exists());
    }

    #[tokio::test]
    async fn missing_favicon_signals_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let page = Url::parse("https://example.com/page").unwrap();
        let event = Arc::new(ManualResetEvent::new());

        cache.obtain(&page, None, CompletionGuard::new(Arc::clone(&event)));
        assert!(event.is_set());
    }

    #[tokio::test]
    async fn icon_path_is_stable_per_url() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let a = Url::parse("https://a.example/").unwrap();
        let b = Url::parse("https://b.example/").unwrap();
        assert_eq!(cache.icon_path(&a), cache.icon_path(&a));
        assert_ne!(cache.icon_path(&a), cache.icon_path(&b));
        assert_eq!(cache.icon_path(&a).extension().unwrap(), "ico");
    }
}
