//! Built-in format producers.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use url::Url;

use crate::encode::{MIME_BMP, MIME_PNG};
use crate::format::{BuiltinFormat, FormatSpec, MediumKinds};
use crate::format::registry::BuiltinEntry;
use crate::medium::Medium;
use crate::source::{Payload, flavors};
use crate::stream::{ContentStream, PullStream, SharedMemoryStream, url_file_name};
use crate::sync::{CompletionGuard, ManualResetEvent, SharedRegion};

use super::cache::{create_unique, random_name};
use super::filename::{UNTITLED_SHORTCUT, sanitize, shortcut_file_name};
use super::layout::{self, BITMAP_FILE_HEADER_LEN, FD_LINKUI, FD_PROGRESSUI};
use super::{ImageFileFormat, TransferError, TransferObject};

fn unavailable(what: impl Into<String>) -> TransferError {
    TransferError::ContentUnavailable(what.into())
}

impl TransferObject {
    pub(super) fn produce(
        &self,
        entry: &BuiltinEntry,
        requested: &FormatSpec,
    ) -> Result<Medium, TransferError> {
        let medium = match BuiltinFormat::from_id(entry.spec.format) {
            BuiltinFormat::Text => Medium::Memory(layout::narrow(&self.text(&entry.flavor)?, true)),
            BuiltinFormat::UnicodeText | BuiltinFormat::Other(_) => {
                Medium::Memory(layout::utf16(&self.text(&entry.flavor)?, true))
            }
            BuiltinFormat::Custom => Medium::Memory(layout::utf16(&self.text(&entry.flavor)?, false)),
            BuiltinFormat::Html => self.html(&entry.flavor)?,
            BuiltinFormat::Dib => self.dib("version=3")?,
            BuiltinFormat::DibV5 => self.dib("version=5")?,
            BuiltinFormat::Png => {
                let bytes = self.services.encoder.encode(&*self.image()?, MIME_PNG, "")?;
                Medium::Memory(Bytes::from(bytes))
            }
            BuiltinFormat::Hdrop => Medium::Memory(layout::drop_files(&self.drop_path()?)),
            BuiltinFormat::FileDescriptorA => self.file_descriptor(false)?,
            BuiltinFormat::FileDescriptorW => self.file_descriptor(true)?,
            BuiltinFormat::InetUrlA => {
                let url = self.shortcut_url().ok_or_else(|| unavailable("no URL offered"))?;
                Medium::Memory(layout::narrow(&layout::ascii_lossy(&url), true))
            }
            BuiltinFormat::InetUrlW => {
                let url = self.shortcut_url().ok_or_else(|| unavailable("no URL offered"))?;
                Medium::Memory(layout::utf16(&url, true))
            }
            BuiltinFormat::FileContents => self.file_contents(requested)?,
            BuiltinFormat::PreferredDropEffect => Medium::Memory(layout::preferred_drop_effect()),
        };
        tracing::trace!(object = %self.id, format = entry.spec.format, medium = ?medium, "format produced");
        Ok(medium)
    }

    fn text(&self, flavor: &str) -> Result<String, TransferError> {
        match self.source.payload(flavor) {
            Some(Payload::Text(text)) => Ok(text),
            Some(_) => Err(unavailable(format!("{flavor} is not text"))),
            None => Err(unavailable(format!("{flavor} not offered"))),
        }
    }

    fn optional_text(&self, flavor: &str) -> Option<String> {
        self.source
            .payload(flavor)
            .and_then(|p| p.as_text().map(str::to_string))
            .filter(|text| !text.is_empty())
    }

    fn image(&self) -> Result<Arc<DynamicImage>, TransferError> {
        self.source
            .payload(flavors::NATIVE_IMAGE)
            .and_then(|p| p.as_image().cloned())
            .ok_or_else(|| unavailable("no image offered"))
    }

    fn offered_file(&self) -> Option<PathBuf> {
        self.source
            .payload(flavors::FILE)
            .and_then(|p| p.as_file().cloned())
    }

    fn html(&self, flavor: &str) -> Result<Medium, TransferError> {
        let fragment = self.text(flavor)?;
        let source_url = self
            .source_url
            .lock()
            .clone()
            .or_else(|| self.shortcut_url());
        Ok(Medium::Memory(layout::cf_html(&fragment, source_url.as_deref())))
    }

    fn dib(&self, options: &str) -> Result<Medium, TransferError> {
        let bmp = self.services.encoder.encode(&*self.image()?, MIME_BMP, options)?;
        if bmp.len() <= BITMAP_FILE_HEADER_LEN {
            return Err(unavailable("encoded bitmap has no pixel data"));
        }
        Ok(Medium::Memory(Bytes::from(bmp).slice(BITMAP_FILE_HEADER_LEN..)))
    }

    /// URL of a dragged link: the first line of the URL flavor, else the
    /// URL data flavors.
    fn shortcut_url(&self) -> Option<String> {
        if let Some(text) = self.optional_text(flavors::URL) {
            let first = text.split('\n').next().unwrap_or_default().trim_end_matches('\r');
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
        self.optional_text(flavors::URL_DATA)
            .or_else(|| self.optional_text(flavors::URL_PRIVATE))
    }

    /// Title of a dragged link: what follows the first line of the URL flavor.
    fn shortcut_title(&self) -> Option<String> {
        let text = self.optional_text(flavors::URL)?;
        let (_, title) = text.split_once('\n')?;
        Some(title.to_string())
    }

    /// Source URL and sanitized file name of a file promise.
    fn download_details(&self) -> Result<(Url, String), TransferError> {
        let spec = self
            .optional_text(flavors::FILE_PROMISE_URL)
            .ok_or_else(|| unavailable("file promise has no URL"))?;
        let url = Url::parse(&spec).map_err(|e| unavailable(format!("bad promise URL {spec}: {e}")))?;
        let name = self
            .optional_text(flavors::FILE_PROMISE_DEST_FILENAME)
            .or_else(|| url_file_name(&url))
            .map(|name| sanitize(&name))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| unavailable(format!("no file name for {url}")))?;
        Ok((url, name))
    }

    /// File handed out in a drop: the offered file, else a temp file
    /// materialized from the promise, else the image written to disk.
    fn drop_path(&self) -> Result<PathBuf, TransferError> {
        if let Some(path) = self.offered_file() {
            return Ok(path);
        }
        if self.source.has_flavor(flavors::FILE_PROMISE) {
            return self.temp.get_or_create(|| self.drop_temp_file());
        }
        if self.source.has_flavor(flavors::NATIVE_IMAGE) {
            return self.temp.get_or_create(|| self.drop_image());
        }
        Err(unavailable("nothing to drop as a file"))
    }

    fn drop_temp_file(&self) -> Result<PathBuf, TransferError> {
        let (url, name) = self.download_details()?;
        let mut stream = ContentStream::open(url, self.services.fetcher.as_ref(), &self.services.queue);

        std::fs::create_dir_all(&self.config.temp_dir)?;
        let (mut file, path) = create_unique(&self.config.temp_dir, &name)?;
        let copied = copy_stream(&mut stream, &mut file, self.config.copy_chunk);
        if let Err(e) = copied {
            drop(file);
            discard(&path);
            return Err(e);
        }
        tracing::debug!(object = %self.id, path = %path.display(), "file promise materialized");
        Ok(path)
    }

    fn drop_image(&self) -> Result<PathBuf, TransferError> {
        let image = self.image()?;
        let (mime, options, ext) = match self.config.image_file_format {
            ImageFileFormat::Png => (MIME_PNG, "", ".png"),
            ImageFileFormat::Bmp => (MIME_BMP, "bpp=32;version=3", ".bmp"),
        };
        let bytes = self.services.encoder.encode(&*image, mime, options)?;

        std::fs::create_dir_all(&self.config.temp_dir)?;
        let (mut file, path) = create_unique(&self.config.temp_dir, &random_name(ext))?;
        if let Err(e) = file.write_all(&bytes).and_then(|()| file.flush()) {
            drop(file);
            discard(&path);
            return Err(e.into());
        }
        tracing::debug!(object = %self.id, path = %path.display(), "image written for drop");
        Ok(path)
    }

    fn file_descriptor(&self, wide: bool) -> Result<Medium, TransferError> {
        let (name, flags) = if let Some(path) = self.offered_file() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| unavailable(format!("{} has no file name", path.display())))?;
            (name, FD_PROGRESSUI)
        } else if self.source.has_flavor(flavors::FILE_PROMISE) {
            (self.download_details()?.1, FD_PROGRESSUI)
        } else if self.shortcut_url().is_some() {
            let name = self
                .shortcut_title()
                .and_then(|title| shortcut_file_name(&title))
                .unwrap_or_else(|| UNTITLED_SHORTCUT.to_string());
            (name, FD_LINKUI)
        } else {
            return Err(unavailable("nothing to describe"));
        };

        let descriptor = if wide {
            layout::file_group_descriptor_w(&name, flags)
        } else {
            layout::file_group_descriptor_a(&name, flags)
        };
        Ok(Medium::Memory(descriptor))
    }

    fn file_contents(&self, requested: &FormatSpec) -> Result<Medium, TransferError> {
        if let Some(path) = self.offered_file() {
            let url = Url::from_file_path(&path)
                .map_err(|()| unavailable(format!("{} is not an absolute path", path.display())))?;
            return Ok(self.content_stream(url));
        }
        if self.source.has_flavor(flavors::FILE_PROMISE) {
            let (url, _) = self.download_details()?;
            return Ok(self.content_stream(url));
        }
        let url = self.shortcut_url().ok_or_else(|| unavailable("no file contents offered"))?;
        Ok(self.shortcut_contents(&url, requested))
    }

    fn content_stream(&self, url: Url) -> Medium {
        Medium::stream(ContentStream::open(
            url,
            self.services.fetcher.as_ref(),
            &self.services.queue,
        ))
    }

    /// `.url` file contents. When favicons are enabled the icon file is
    /// requested from the icon cache and a stream reader waits for it, but
    /// only while the consumer runs an async operation.
    fn shortcut_contents(&self, url: &str, requested: &FormatSpec) -> Medium {
        let event = Arc::new(ManualResetEvent::new());
        let page = Url::parse(url).ok().filter(|_| self.config.shortcut_favicons);
        let icon = match page {
            Some(page) => {
                let favicon = self
                    .source
                    .payload(flavors::FAVICON)
                    .and_then(|p| p.as_image().cloned());
                let path = self.services.icons.icon_path(&page);
                self.services
                    .icons
                    .obtain(&page, favicon, CompletionGuard::new(Arc::clone(&event)));
                Some(path)
            }
            None => {
                event.set();
                None
            }
        };

        let contents = layout::internet_shortcut(&layout::ascii_lossy(url), icon.as_deref());
        if requested.media.contains(MediumKinds::STREAM) {
            let completion = self.in_operation().then_some(event);
            let region = SharedRegion::from_slice(&contents);
            Medium::stream(SharedMemoryStream::new(
                region,
                contents.len(),
                completion,
                &self.services.queue,
            ))
        } else {
            event.set();
            Medium::Memory(contents)
        }
    }
}

fn copy_stream(
    stream: &mut dyn PullStream,
    out: &mut impl Write,
    chunk: usize,
) -> Result<(), TransferError> {
    let mut buf = vec![0u8; chunk.max(1)];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    out.flush()?;
    Ok(())
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "partial temporary file left behind");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{
        DIB, DIBV5, FILE_CONTENTS, FILE_DESCRIPTOR_W, HDROP, HTML, INET_URL_A, PNG, PREFERRED_DROP_EFFECT,
        TEXT, UNICODE_TEXT,
    };
    use crate::source::StaticSource;
    use crate::stream::read_to_end;
    use crate::transfer::tests::{harness, memory_bytes};

    const MEMORY: MediumKinds = MediumKinds::MEMORY;

    #[tokio::test]
    async fn text_formats() {
        let source = StaticSource::new().with(flavors::TEXT, Payload::Text("héllo".into()));
        let h = harness(source);

        let wide = memory_bytes(h.object.get_data(&FormatSpec::new(UNICODE_TEXT, MEMORY)).unwrap());
        assert_eq!(wide, layout::utf16("héllo", true));
        let narrow = memory_bytes(h.object.get_data(&FormatSpec::new(TEXT, MEMORY)).unwrap());
        assert_eq!(&narrow[..], "héllo\0".as_bytes());
    }

    #[tokio::test]
    async fn html_uses_link_as_source_url() {
        let source = StaticSource::new()
            .with(flavors::HTML, Payload::Text("<b>x</b>".into()))
            .with(flavors::URL, Payload::Text("https://example.com/a\nA".into()));
        let h = harness(source);

        let html = memory_bytes(h.object.get_data(&FormatSpec::new(HTML, MEMORY)).unwrap());
        let text = String::from_utf8_lossy(&html);
        assert!(text.starts_with("Version:0.9\r\n"));
        assert!(text.contains("SourceURL:https://example.com/a\r\n"));
        assert!(text.contains("<!--StartFragment--><b>x</b><!--EndFragment-->"));
        assert_eq!(html.last(), Some(&0));

        h.object.set_source_url(Some("https://origin.example/".into()));
        let html = memory_bytes(h.object.get_data(&FormatSpec::new(HTML, MEMORY)).unwrap());
        assert!(String::from_utf8_lossy(&html).contains("SourceURL:https://origin.example/\r\n"));
    }

    #[tokio::test]
    async fn image_formats() {
        let image = DynamicImage::ImageRgba8(image::RgbaImage::new(3, 2));
        let source = StaticSource::new().with(flavors::NATIVE_IMAGE, Payload::Image(Arc::new(image)));
        let h = harness(source);

        let dib = memory_bytes(h.object.get_data(&FormatSpec::new(DIB, MEMORY)).unwrap());
        // Header size field of the info header leads the DIB.
        assert!(u32::from_le_bytes(dib[..4].try_into().unwrap()) >= 40);

        let dib_v5 = memory_bytes(h.object.get_data(&FormatSpec::new(DIBV5, MEMORY)).unwrap());
        assert_eq!(u32::from_le_bytes(dib_v5[..4].try_into().unwrap()), 124);
        assert_eq!(dib_v5.len(), 124 + 3 * 2 * 4);

        let png = memory_bytes(h.object.get_data(&FormatSpec::new(PNG, MEMORY)).unwrap());
        assert_eq!(&png[1..4], b"PNG");

        let effect = memory_bytes(
            h.object
                .get_data(&FormatSpec::new(PREFERRED_DROP_EFFECT, MEMORY))
                .unwrap(),
        );
        assert_eq!(&effect[..], &2u32.to_le_bytes());
    }

    #[tokio::test]
    async fn image_drop_writes_one_temp_file() {
        let image = DynamicImage::ImageRgba8(image::RgbaImage::new(2, 2));
        let source = StaticSource::new().with(flavors::NATIVE_IMAGE, Payload::Image(Arc::new(image)));
        let h = harness(source);

        let first = h.object.get_data(&FormatSpec::new(HDROP, MEMORY)).unwrap();
        let second = h.object.get_data(&FormatSpec::new(HDROP, MEMORY)).unwrap();
        assert_eq!(memory_bytes(first), memory_bytes(second));

        let path = h.object.temp.path().unwrap();
        assert!(path.starts_with(h.dir.path()));
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(std::fs::read_dir(h.dir.path().join("drops")).unwrap().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn promise_drop_materializes_fetched_content() {
        let h = harness(StaticSource::new());
        let origin = h.dir.path().join("origin.txt");
        std::fs::write(&origin, vec![b'z'; 2000]).unwrap();
        let source = StaticSource::new()
            .with(flavors::FILE_PROMISE, Payload::Text(String::new()))
            .with(
                flavors::FILE_PROMISE_URL,
                Payload::Text(Url::from_file_path(&origin).unwrap().to_string()),
            )
            .with(flavors::FILE_PROMISE_DEST_FILENAME, Payload::Text("copy:1.txt".into()));
        let object = h.object_for(source);

        object.get_data(&FormatSpec::new(HDROP, MEMORY)).unwrap();
        let path = object.temp.path().unwrap();
        assert_eq!(path.file_name().unwrap(), "copy_1.txt");
        assert_eq!(std::fs::read(&path).unwrap().len(), 2000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offered_file_is_streamed() {
        let h = harness(StaticSource::new());
        let origin = h.dir.path().join("notes.txt");
        std::fs::write(&origin, b"file body").unwrap();
        let object = h.object_for(StaticSource::new().with(flavors::FILE, Payload::File(origin.clone())));

        let drop = memory_bytes(object.get_data(&FormatSpec::new(HDROP, MEMORY)).unwrap());
        assert_eq!(drop, layout::drop_files(&origin));

        let medium = object
            .get_data(&FormatSpec::new(FILE_CONTENTS, MediumKinds::STREAM))
            .unwrap();
        let Medium::Stream(handle) = medium else {
            panic!("expected a stream");
        };
        let bytes = read_to_end(handle.lock().as_mut()).unwrap();
        assert_eq!(bytes, b"file body");
        // The offered file is handed out as-is, never copied.
        assert!(object.temp.path().is_none());
    }

    #[tokio::test]
    async fn link_descriptor_and_url() {
        let source = StaticSource::new().with(
            flavors::URL,
            Payload::Text("https://example.com/ü\nExample: Page".into()),
        );
        let h = harness(source);

        let descriptor = memory_bytes(
            h.object
                .get_data(&FormatSpec::new(FILE_DESCRIPTOR_W, MEMORY))
                .unwrap(),
        );
        assert_eq!(&descriptor[..4], &1u32.to_le_bytes());
        assert_eq!(&descriptor[4..8], &FD_LINKUI.to_le_bytes());
        let name_units: Vec<u16> = descriptor[4 + 72..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|unit| *unit != 0)
            .collect();
        assert_eq!(String::from_utf16(&name_units).unwrap(), "Example_ Page.url");

        let ascii = memory_bytes(h.object.get_data(&FormatSpec::new(INET_URL_A, MEMORY)).unwrap());
        assert_eq!(&ascii[..], b"https://example.com/?\0");
    }

    #[tokio::test]
    async fn untitled_link_descriptor() {
        let source = StaticSource::new().with(flavors::URL, Payload::Text("https://example.com/".into()));
        let h = harness(source);
        let descriptor = memory_bytes(
            h.object
                .get_data(&FormatSpec::new(crate::format::FILE_DESCRIPTOR_A, MEMORY))
                .unwrap(),
        );
        let name: Vec<u8> = descriptor[4 + 72..].iter().copied().take_while(|b| *b != 0).collect();
        assert_eq!(name, UNTITLED_SHORTCUT.as_bytes());
    }

    #[tokio::test]
    async fn shortcut_contents_in_memory() {
        let source = StaticSource::new().with(flavors::URL, Payload::Text("https://example.com/\nEx".into()));
        let h = harness(source);

        let contents = memory_bytes(h.object.get_data(&FormatSpec::new(FILE_CONTENTS, MEMORY)).unwrap());
        let text = String::from_utf8(contents.to_vec()).unwrap();
        assert!(text.starts_with("[InternetShortcut]\r\nURL=https://example.com/\r\n"));
        assert!(text.contains("IconFile="));
    }

    #[tokio::test]
    async fn shortcut_stream_outside_operation_does_not_wait() {
        let source = StaticSource::new().with(flavors::URL, Payload::Text("https://example.com/\nEx".into()));
        let h = harness(source);

        let medium = h
            .object
            .get_data(&FormatSpec::new(FILE_CONTENTS, MediumKinds::STREAM))
            .unwrap();
        let Medium::Stream(handle) = medium else {
            panic!("expected a stream");
        };
        // Read from a thread that does not own the shell queue; with no
        // async operation running there is no event to wait on.
        let bytes = std::thread::spawn(move || read_to_end(handle.lock().as_mut()).unwrap())
            .join()
            .unwrap();
        assert!(bytes.starts_with(b"[InternetShortcut]"));
    }

    #[tokio::test]
    async fn missing_payload_is_unavailable() {
        let source = StaticSource::new().with(flavors::NATIVE_IMAGE, Payload::Text("not an image".into()));
        let h = harness(source);
        let err = h.object.get_data(&FormatSpec::new(PNG, MEMORY)).unwrap_err();
        assert!(matches!(err, TransferError::ContentUnavailable(_)));
    }
}
