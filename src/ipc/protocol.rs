//! Wire protocol message types for daemon IPC.
//!
//! All messages are MessagePack-encoded maps with at minimum `type` and `id`
//! fields. Objects are addressed by the numeric id returned from `offer`.

use serde::{Deserialize, Serialize};

use crate::format::{Aspect, FormatSpec, MediumKinds};

/// All wire protocol messages.
///
/// Serialized as a tagged union on the `type` field via MessagePack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    // -- Handshake --
    #[serde(rename = "hello")]
    Hello { id: u32, version: u32 },

    #[serde(rename = "hello_ack")]
    HelloAck {
        id: u32,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // -- Object lifetime --
    #[serde(rename = "offer")]
    Offer {
        id: u32,
        entries: Vec<OfferEntry>,
        /// Page the content came from; used in the HTML header.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_url: Option<String>,
    },

    #[serde(rename = "add_ref")]
    AddRef { id: u32, object: u64 },

    #[serde(rename = "release")]
    Release { id: u32, object: u64 },

    // -- Shell pull interface --
    #[serde(rename = "enum_formats")]
    EnumFormats {
        id: u32,
        object: u64,
        #[serde(default)]
        direction: WireDirection,
    },

    #[serde(rename = "query_get_data")]
    QueryGetData {
        id: u32,
        object: u64,
        format: WireFormat,
    },

    #[serde(rename = "get_data")]
    GetData {
        id: u32,
        object: u64,
        format: WireFormat,
    },

    #[serde(rename = "set_data")]
    SetData {
        id: u32,
        object: u64,
        format: WireFormat,
        medium: MediumTag,
        #[serde(with = "serde_bytes")]
        content: Vec<u8>,
        #[serde(default)]
        take_ownership: bool,
    },

    // -- Async operation --
    #[serde(rename = "start_operation")]
    StartOperation { id: u32, object: u64 },

    #[serde(rename = "end_operation")]
    EndOperation { id: u32, object: u64 },

    // -- Generic response --
    #[serde(rename = "response")]
    Response {
        id: u32,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object: Option<u64>,
        /// Reference count after `offer`, `add_ref` or `release`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        available: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formats: Option<Vec<FormatDescriptor>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        medium: Option<MediumTag>,
        #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
        content: Option<Vec<u8>>,
    },
}

/// Response status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// How an offered flavor's `data` is to be read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// UTF-8 text.
    Text,
    /// Encoded image (PNG, BMP or ICO).
    Image,
    /// UTF-8 absolute path.
    File,
}

/// One flavor of an offer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OfferEntry {
    pub flavor: String,
    pub kind: PayloadKind,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Delivery medium of a `get_data` result or `set_data` payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediumTag {
    Memory,
    Stream,
    Storage,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WireDirection {
    #[default]
    Get,
    Set,
}

/// A format spec on the wire. Bit sets travel as raw integers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireFormat {
    pub format: u32,
    #[serde(default = "content_aspect")]
    pub aspect: u32,
    pub media: u32,
    #[serde(default = "all_items")]
    pub index: i32,
}

fn content_aspect() -> u32 {
    Aspect::CONTENT.bits()
}

fn all_items() -> i32 {
    -1
}

impl From<WireFormat> for FormatSpec {
    fn from(wire: WireFormat) -> Self {
        FormatSpec {
            format: wire.format,
            aspect: Aspect::from_bits_truncate(wire.aspect),
            media: MediumKinds::from_bits_truncate(wire.media),
            index: wire.index,
        }
    }
}

impl From<FormatSpec> for WireFormat {
    fn from(spec: FormatSpec) -> Self {
        WireFormat {
            format: spec.format,
            aspect: spec.aspect.bits(),
            media: spec.media.bits(),
            index: spec.index,
        }
    }
}

/// Enumerated format with its display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub name: String,
    pub spec: WireFormat,
}

/// Protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Minimal envelope for extracting `{type, id}` from unknown messages.
///
/// Used as a fallback when [`Message`] deserialization fails (e.g. an
/// unknown `type` tag), so the error response can echo the request `id`.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub id: u32,
}
