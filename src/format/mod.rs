//! Format specifications and the per-object format registry.
//!
//! A [`FormatSpec`] names a clipboard format id together with the view
//! (aspect) and the delivery media a consumer accepts. Well-known ids keep
//! their platform numbering; the named formats registered at runtime on
//! the platform are given fixed ids here.

pub mod registry;

use bitflags::bitflags;
use parking_lot::Mutex;

pub use registry::{ArbitraryLookup, BuiltinMatch, Direction, FormatRegistry};

bitflags! {
    /// Which rendering of the data is requested.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Aspect: u32 {
        const CONTENT = 1;
        const THUMBNAIL = 2;
        const ICON = 4;
        const DOCPRINT = 8;
    }
}

bitflags! {
    /// Delivery media a consumer accepts or a producer offers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MediumKinds: u32 {
        const MEMORY = 1;
        const FILE = 2;
        const STREAM = 4;
        const STORAGE = 8;
    }
}

// Well-known ids.
pub const TEXT: u32 = 1;
pub const DIB: u32 = 8;
pub const UNICODE_TEXT: u32 = 13;
pub const HDROP: u32 = 15;
pub const DIBV5: u32 = 17;

// Named formats.
pub const HTML: u32 = 0xC001;
pub const FILE_DESCRIPTOR_A: u32 = 0xC002;
pub const FILE_DESCRIPTOR_W: u32 = 0xC003;
pub const INET_URL_A: u32 = 0xC004;
pub const INET_URL_W: u32 = 0xC005;
pub const FILE_CONTENTS: u32 = 0xC006;
pub const PREFERRED_DROP_EFFECT: u32 = 0xC007;
pub const PNG: u32 = 0xC008;
pub const CUSTOM: u32 = 0xC009;

const NAMED_FORMATS: &[(u32, &str)] = &[
    (TEXT, "CF_TEXT"),
    (DIB, "CF_DIB"),
    (UNICODE_TEXT, "CF_UNICODETEXT"),
    (HDROP, "CF_HDROP"),
    (DIBV5, "CF_DIBV5"),
    (HTML, "HTML Format"),
    (FILE_DESCRIPTOR_A, "FileGroupDescriptor"),
    (FILE_DESCRIPTOR_W, "FileGroupDescriptorW"),
    (INET_URL_A, "UniformResourceLocator"),
    (INET_URL_W, "UniformResourceLocatorW"),
    (FILE_CONTENTS, "FileContents"),
    (PREFERRED_DROP_EFFECT, "Preferred DropEffect"),
    (PNG, "PNG"),
    (CUSTOM, "application/x-moz-custom-clipdata"),
];

/// Human-readable name of a known format id.
pub fn format_name(id: u32) -> Option<&'static str> {
    NAMED_FORMATS
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, name)| *name)
}

/// First id handed out to a runtime-registered name.
const FIRST_REGISTERED: u32 = 0xC100;

/// Names registered at runtime, indexed from [`FIRST_REGISTERED`].
static REGISTERED: Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());

/// Id for an arbitrary format name, allocating one on first use.
///
/// Well-known names resolve to their fixed ids. The same name always maps
/// to the same id within a process.
pub fn register_format_name(name: &str) -> u32 {
    if let Some((id, _)) = NAMED_FORMATS.iter().find(|(_, known)| *known == name) {
        return *id;
    }
    let mut registered = REGISTERED.lock();
    let position = match registered.iter().position(|known| known == name) {
        Some(position) => position,
        None => {
            registered.push(name.to_string());
            registered.len() - 1
        }
    };
    FIRST_REGISTERED + position as u32
}

/// Name of a well-known or runtime-registered id, or its hex form.
pub fn display_name(id: u32) -> String {
    if let Some(name) = format_name(id) {
        return name.to_string();
    }
    id.checked_sub(FIRST_REGISTERED)
        .and_then(|position| REGISTERED.lock().get(position as usize).cloned())
        .unwrap_or_else(|| format!("0x{id:04X}"))
}

/// Resolve a format by name (case-insensitive) or numeric id.
pub fn parse_format(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if let Ok(id) = text.parse::<u32>() {
        return Some(id);
    }
    NAMED_FORMATS
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(text))
        .map(|(id, _)| *id)
}

/// A requested or offered format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatSpec {
    pub format: u32,
    pub aspect: Aspect,
    pub media: MediumKinds,
    pub index: i32,
}

impl FormatSpec {
    /// Content aspect, all items (`index == -1`).
    pub const fn new(format: u32, media: MediumKinds) -> Self {
        Self {
            format,
            aspect: Aspect::CONTENT,
            media,
            index: -1,
        }
    }

    pub const fn with_index(mut self, index: i32) -> Self {
        self.index = index;
        self
    }

    /// Shell matching rule: same id, overlapping aspects, overlapping media.
    pub fn matches(&self, offered: &FormatSpec) -> bool {
        self.format == offered.format
            && self.aspect.intersects(offered.aspect)
            && self.media.intersects(offered.media)
    }

    /// Identity of an arbitrary entry: id, aspect and index all equal.
    pub fn same_identity(&self, other: &FormatSpec) -> bool {
        self.format == other.format && self.aspect == other.aspect && self.index == other.index
    }
}

/// Closed set of formats the object knows how to produce itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFormat {
    Text,
    UnicodeText,
    Html,
    Dib,
    DibV5,
    Png,
    Hdrop,
    FileDescriptorA,
    FileDescriptorW,
    InetUrlA,
    InetUrlW,
    FileContents,
    PreferredDropEffect,
    Custom,
    /// Any other id registered for a flavor; served as wide text.
    Other(u32),
}

impl BuiltinFormat {
    pub fn from_id(id: u32) -> Self {
        match id {
            TEXT => Self::Text,
            UNICODE_TEXT => Self::UnicodeText,
            HTML => Self::Html,
            DIB => Self::Dib,
            DIBV5 => Self::DibV5,
            PNG => Self::Png,
            HDROP => Self::Hdrop,
            FILE_DESCRIPTOR_A => Self::FileDescriptorA,
            FILE_DESCRIPTOR_W => Self::FileDescriptorW,
            INET_URL_A => Self::InetUrlA,
            INET_URL_W => Self::InetUrlW,
            FILE_CONTENTS => Self::FileContents,
            PREFERRED_DROP_EFFECT => Self::PreferredDropEffect,
            CUSTOM => Self::Custom,
            other => Self::Other(other),
        }
    }
}
