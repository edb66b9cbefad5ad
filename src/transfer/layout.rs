//! Byte layouts handed to the shell.
//!
//! All multi-byte integers are little-endian, strings are UTF-16LE for the
//! wide variants and UTF-8 for the narrow ones.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use bytes::{BufMut, Bytes, BytesMut};

pub const MAX_PATH: usize = 260;

pub const FD_PROGRESSUI: u32 = 0x4000;
pub const FD_LINKUI: u32 = 0x8000;

pub const DROPEFFECT_MOVE: u32 = 2;

/// `DROPFILES` header: pFiles, pt.x, pt.y, fNC, fWide.
const DROPFILES_LEN: u32 = 20;

/// `FILEDESCRIPTOR` fields preceding the file name.
const DESCRIPTOR_FIXED_LEN: usize = 72;

/// Bitmap file header stripped from encoded BMPs to form a DIB.
pub const BITMAP_FILE_HEADER_LEN: usize = 14;

pub fn utf16(text: &str, nul: bool) -> Bytes {
    let mut out = BytesMut::with_capacity((text.len() + 1) * 2);
    for unit in text.encode_utf16() {
        out.put_u16_le(unit);
    }
    if nul {
        out.put_u16_le(0);
    }
    out.freeze()
}

pub fn narrow(text: &str, nul: bool) -> Bytes {
    let mut out = BytesMut::with_capacity(text.len() + 1);
    out.put_slice(text.as_bytes());
    if nul {
        out.put_u8(0);
    }
    out.freeze()
}

/// Non-ASCII characters become `?`.
pub fn ascii_lossy(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

/// File-list drop payload naming one path.
pub fn drop_files(path: &Path) -> Bytes {
    let path = path.to_string_lossy();
    let mut out = BytesMut::with_capacity(DROPFILES_LEN as usize + (path.len() + 2) * 2);
    out.put_u32_le(DROPFILES_LEN);
    out.put_i32_le(0);
    out.put_i32_le(0);
    out.put_u32_le(0);
    out.put_u32_le(1);
    for unit in path.encode_utf16() {
        out.put_u16_le(unit);
    }
    // Path terminator plus list terminator.
    out.put_u16_le(0);
    out.put_u16_le(0);
    out.freeze()
}

/// One-item wide file group descriptor.
pub fn file_group_descriptor_w(name: &str, flags: u32) -> Bytes {
    let mut out = BytesMut::with_capacity(4 + DESCRIPTOR_FIXED_LEN + MAX_PATH * 2);
    out.put_u32_le(1);
    put_descriptor_fixed(&mut out, flags);
    let units: Vec<u16> = name.encode_utf16().take(MAX_PATH - 1).collect();
    for unit in &units {
        out.put_u16_le(*unit);
    }
    out.put_bytes(0, (MAX_PATH - units.len()) * 2);
    out.freeze()
}

/// One-item narrow file group descriptor.
pub fn file_group_descriptor_a(name: &str, flags: u32) -> Bytes {
    let mut out = BytesMut::with_capacity(4 + DESCRIPTOR_FIXED_LEN + MAX_PATH);
    out.put_u32_le(1);
    put_descriptor_fixed(&mut out, flags);
    let name = truncate_at_char_boundary(name, MAX_PATH - 1);
    out.put_slice(name.as_bytes());
    out.put_bytes(0, MAX_PATH - name.len());
    out.freeze()
}

fn put_descriptor_fixed(out: &mut BytesMut, flags: u32) {
    out.put_u32_le(flags);
    // clsid, sizel, pointl, attributes, three timestamps, size high/low
    out.put_bytes(0, DESCRIPTOR_FIXED_LEN - 4);
}

fn truncate_at_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

const HTML_VERSION_PREFIX: &str = "Version:0.9\r\nStartHTML:";
const HTML_END_HTML_PREFIX: &str = "\r\nEndHTML:";
const HTML_START_FRAGMENT_PREFIX: &str = "\r\nStartFragment:";
const HTML_END_FRAGMENT_PREFIX: &str = "\r\nEndFragment:";
const HTML_SOURCE_URL_PREFIX: &str = "\r\nSourceURL:";
const HTML_HEADER_TRAILER: &str = "\r\n";
const HTML_OPEN: &str = "<html><body>\r\n<!--StartFragment-->";
const HTML_CLOSE: &str = "<!--EndFragment-->\r\n</body>\r\n</html>";

/// Fragments at least this long get 16-digit offsets instead of 8.
const HTML_WIDE_OFFSETS_AT: usize = 99_990_000;

/// Wrap an HTML fragment in the clipboard HTML header. NUL-terminated.
pub fn cf_html(fragment: &str, source_url: Option<&str>) -> Bytes {
    let digits = if fragment.len() < HTML_WIDE_OFFSETS_AT { 8 } else { 16 };
    let source_url = source_url.filter(|u| !u.is_empty());

    let fixed = HTML_VERSION_PREFIX.len()
        + HTML_END_HTML_PREFIX.len()
        + HTML_START_FRAGMENT_PREFIX.len()
        + HTML_END_FRAGMENT_PREFIX.len()
        + HTML_HEADER_TRAILER.len()
        + 4 * digits;
    let header_len = fixed + source_url.map_or(0, |u| HTML_SOURCE_URL_PREFIX.len() + u.len());

    let start_html = header_len;
    let start_fragment = start_html + HTML_OPEN.len();
    let end_fragment = start_fragment + fragment.len();
    let end_html = end_fragment + HTML_CLOSE.len();

    let mut out = String::with_capacity(end_html + 1);
    out.push_str(HTML_VERSION_PREFIX);
    out.push_str(&format!("{start_html:0digits$}"));
    out.push_str(HTML_END_HTML_PREFIX);
    out.push_str(&format!("{end_html:0digits$}"));
    out.push_str(HTML_START_FRAGMENT_PREFIX);
    out.push_str(&format!("{start_fragment:0digits$}"));
    out.push_str(HTML_END_FRAGMENT_PREFIX);
    out.push_str(&format!("{end_fragment:0digits$}"));
    if let Some(url) = source_url {
        out.push_str(HTML_SOURCE_URL_PREFIX);
        out.push_str(url);
    }
    out.push_str(HTML_HEADER_TRAILER);
    debug_assert_eq!(out.len(), start_html);
    out.push_str(HTML_OPEN);
    out.push_str(fragment);
    out.push_str(HTML_CLOSE);
    debug_assert_eq!(out.len(), end_html);

    narrow(&out, true)
}

/// Internet shortcut (`.url`) file contents, without a terminator.
pub fn internet_shortcut(ascii_url: &str, icon: Option<&Path>) -> Bytes {
    let text = match icon.map(|p| p.to_string_lossy()) {
        None => format!("[InternetShortcut]\r\nURL={ascii_url}\r\n"),
        Some(path) if path.is_ascii() => format!(
            "[InternetShortcut]\r\nURL={ascii_url}\r\n\
             IDList=\r\nHotKey=0\r\nIconFile={path}\r\nIconIndex=0\r\n"
        ),
        Some(path) => format!(
            "[InternetShortcut]\r\nURL={ascii_url}\r\n\
             IDList=\r\nHotKey=0\r\nIconIndex=0\r\n\
             [InternetShortcut.W]\r\nIconFile={}\r\n",
            utf7(&path)
        ),
    };
    Bytes::from(text)
}

/// Little-endian `DROPEFFECT_MOVE`.
pub fn preferred_drop_effect() -> Bytes {
    Bytes::copy_from_slice(&DROPEFFECT_MOVE.to_le_bytes())
}

/// UTF-7 (RFC 2152). Characters outside the direct set are written as
/// `+<modified base64 of UTF-16BE>-`; a literal `+` becomes `+-`.
pub fn utf7(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending: Vec<u8> = Vec::new();

    let flush = |pending: &mut Vec<u8>, out: &mut String| {
        if !pending.is_empty() {
            out.push('+');
            out.push_str(&STANDARD_NO_PAD.encode(&pending[..]));
            out.push('-');
            pending.clear();
        }
    };

    for c in text.chars() {
        if c == '+' {
            flush(&mut pending, &mut out);
            out.push_str("+-");
        } else if is_utf7_direct(c) {
            flush(&mut pending, &mut out);
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                pending.extend_from_slice(&unit.to_be_bytes());
            }
        }
    }
    flush(&mut pending, &mut out);
    out
}

fn is_utf7_direct(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, ' ' | '\t' | '\r' | '\n')
        || "'(),-./:?".contains(c)
        || "!\"#$%&*;<=>@[]^_`{|}".contains(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn offset_field(text: &str, key: &str) -> usize {
        let start = text.find(key).unwrap() + key.len();
        text[start..start + 8].parse().unwrap()
    }

    #[test]
    fn drop_files_layout() {
        let bytes = drop_files(Path::new("/tmp/a.png"));
        assert_eq!(u32_at(&bytes, 0), 20);
        assert_eq!(u32_at(&bytes, 16), 1);
        let expected_len = 20 + ("/tmp/a.png".len() + 2) * 2;
        assert_eq!(bytes.len(), expected_len);
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 0]);
        assert_eq!(&bytes[20..22], &[b'/', 0]);
    }

    #[test]
    fn descriptor_sizes_and_flags() {
        let w = file_group_descriptor_w("report.pdf", FD_PROGRESSUI);
        assert_eq!(w.len(), 4 + 592);
        assert_eq!(u32_at(&w, 0), 1);
        assert_eq!(u32_at(&w, 4), FD_PROGRESSUI);
        assert_eq!(&w[4 + 72..4 + 74], &[b'r', 0]);

        let a = file_group_descriptor_a("Example.url", FD_LINKUI);
        assert_eq!(a.len(), 4 + 332);
        assert_eq!(u32_at(&a, 4), FD_LINKUI);
        assert_eq!(&a[4 + 72..4 + 83], b"Example.url");
        assert_eq!(a[4 + 83], 0);
    }

    #[test]
    fn descriptor_names_are_truncated_with_terminator() {
        let long = "x".repeat(400);
        let w = file_group_descriptor_w(&long, 0);
        assert_eq!(w.len(), 4 + 592);
        assert_eq!(&w[w.len() - 2..], &[0, 0]);
        let a = file_group_descriptor_a(&long, 0);
        assert_eq!(a.len(), 4 + 332);
        assert_eq!(a[a.len() - 1], 0);
    }

    #[test]
    fn cf_html_offsets_point_at_fragment() {
        let fragment = "<b>bold</b>";
        let bytes = cf_html(fragment, Some("https://example.com/"));
        assert_eq!(*bytes.last().unwrap(), 0);
        let text = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();

        let start = offset_field(text, "StartFragment:");
        let end = offset_field(text, "EndFragment:");
        assert_eq!(&text[start..end], fragment);
        assert_eq!(offset_field(text, "EndHTML:"), text.len());
        assert!(text[offset_field(text, "StartHTML:")..].starts_with("<html><body>"));
        assert!(text.contains("\r\nSourceURL:https://example.com/\r\n"));
    }

    #[test]
    fn cf_html_without_source_url() {
        let bytes = cf_html("x", None);
        let text = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
        assert!(!text.contains("SourceURL"));
        assert_eq!(offset_field(text, "StartHTML:"), 97);
    }

    #[test]
    fn shortcut_variants() {
        let plain = internet_shortcut("https://example.com/", None);
        assert_eq!(&plain[..], b"[InternetShortcut]\r\nURL=https://example.com/\r\n");

        let with_icon = internet_shortcut("https://example.com/", Some(Path::new("/c/i.ico")));
        let text = std::str::from_utf8(&with_icon).unwrap();
        assert!(text.ends_with("IconFile=/c/i.ico\r\nIconIndex=0\r\n"));

        let wide = internet_shortcut("https://example.com/", Some(Path::new("/c/日本.ico")));
        let text = std::str::from_utf8(&wide).unwrap();
        assert!(text.contains("[InternetShortcut.W]\r\nIconFile=/c/+ZeVnLA-.ico\r\n"));
    }

    #[test]
    fn utf7_matches_rfc_examples() {
        assert_eq!(utf7("Hi Mom -\u{263A}-!"), "Hi Mom -+Jjo--!");
        assert_eq!(utf7("\u{65E5}\u{672C}\u{8A9E}"), "+ZeVnLIqe-");
        assert_eq!(utf7("1 + 1"), "1 +- 1");
    }

    #[test]
    fn narrow_and_wide_text() {
        assert_eq!(&narrow("hi", true)[..], b"hi\0");
        assert_eq!(&utf16("hi", true)[..], &[b'h', 0, b'i', 0, 0, 0]);
        assert_eq!(&utf16("hi", false)[..], &[b'h', 0, b'i', 0]);
        assert_eq!(ascii_lossy("naïve"), "na?ve");
        assert_eq!(&preferred_drop_effect()[..], &[2, 0, 0, 0]);
    }
}
