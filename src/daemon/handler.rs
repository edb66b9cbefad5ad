//! Message dispatch and request handling.
//!
//! Runs on the shell thread. Each handler resolves the addressed object,
//! calls into it and turns the outcome into a response. Failures carry
//! the machine-readable reason of the underlying [`TransferError`].

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::format::{self, Direction, FormatSpec};
use crate::ipc::protocol::{
    FormatDescriptor, MediumTag, Message, OfferEntry, PROTOCOL_VERSION, PayloadKind, Status,
    WireDirection, WireFormat,
};
use crate::medium::Medium;
use crate::source::{Payload, StaticSource};
use crate::stream::SharedMemoryStream;
use crate::sync::SharedRegion;
use crate::transfer::{TransferError, TransferObject};

use super::state::ShellState;

/// Dispatch a request message to the appropriate handler.
///
/// Server-originated variants are answered with `unknown_type`.
pub fn handle_message(state: &ShellState, request: Message) -> Message {
    match request {
        Message::Hello { id, version } => handle_hello(id, version),
        Message::Offer {
            id,
            entries,
            source_url,
        } => handle_offer(state, id, entries, source_url),
        Message::AddRef { id, object } => with_object(state, id, object, |object| {
            Ok(count_response(id, object.add_ref()))
        }),
        Message::Release { id, object } => with_object(state, id, object, |object| {
            Ok(count_response(id, object.release()))
        }),
        Message::EnumFormats {
            id,
            object,
            direction,
        } => with_object(state, id, object, |object| {
            handle_enum_formats(object, id, direction)
        }),
        Message::QueryGetData { id, object, format } => {
            with_object(state, id, object, |object| {
                let available = object.query_get_data(&FormatSpec::from(format));
                Ok(Message::Response {
                    id,
                    status: Status::Ok,
                    error: None,
                    object: None,
                    count: None,
                    available: Some(available),
                    formats: None,
                    medium: None,
                    content: None,
                })
            })
        }
        Message::GetData { id, object, format } => with_object(state, id, object, |object| {
            handle_get_data(object, id, format)
        }),
        Message::SetData {
            id,
            object,
            format,
            medium,
            content,
            take_ownership,
        } => with_object(state, id, object, |object| {
            let medium = wire_medium(state, medium, content);
            object.set_data(&FormatSpec::from(format), medium, take_ownership)?;
            Ok(ok_response(id))
        }),
        Message::StartOperation { id, object } => with_object(state, id, object, |object| {
            object.start_operation();
            Ok(ok_response(id))
        }),
        Message::EndOperation { id, object } => with_object(state, id, object, |object| {
            object.end_operation();
            Ok(ok_response(id))
        }),
        Message::HelloAck { id, .. } | Message::Response { id, .. } => {
            error_response(id, "unknown_type")
        }
    }
}

// -- Individual handlers --

fn handle_hello(id: u32, version: u32) -> Message {
    // hello.id must be 0.
    if id != 0 {
        return Message::HelloAck {
            id: 0,
            status: Status::Error,
            error: Some("invalid_hello_id".into()),
        };
    }
    if version != PROTOCOL_VERSION {
        return Message::HelloAck {
            id: 0,
            status: Status::Error,
            error: Some("version_mismatch".into()),
        };
    }
    Message::HelloAck {
        id: 0,
        status: Status::Ok,
        error: None,
    }
}

fn handle_offer(
    state: &ShellState,
    id: u32,
    entries: Vec<OfferEntry>,
    source_url: Option<String>,
) -> Message {
    if entries.is_empty() {
        return error_response(id, "invalid_offer");
    }
    let mut source = StaticSource::new();
    for entry in entries {
        match decode_payload(entry.kind, entry.data) {
            Ok(payload) => source.insert(entry.flavor, payload),
            Err(reason) => {
                tracing::debug!(flavor = %entry.flavor, reason, "offer entry rejected");
                return error_response(id, "invalid_offer");
            }
        }
    }
    let (object, count) = state.offer(Arc::new(source), source_url);
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        object: Some(object.id().get()),
        count: Some(count),
        available: None,
        formats: None,
        medium: None,
        content: None,
    }
}

fn handle_enum_formats(
    object: &TransferObject,
    id: u32,
    direction: WireDirection,
) -> Result<Message, TransferError> {
    let direction = match direction {
        WireDirection::Get => Direction::Get,
        WireDirection::Set => Direction::Set,
    };
    let formats = object
        .enum_formats(direction)?
        .into_iter()
        .map(|spec| FormatDescriptor {
            name: format::display_name(spec.format),
            spec: WireFormat::from(spec),
        })
        .collect();
    Ok(Message::Response {
        id,
        status: Status::Ok,
        error: None,
        object: None,
        count: None,
        available: None,
        formats: Some(formats),
        medium: None,
        content: None,
    })
}

/// Streams are drained here, on the shell thread, so their reads may pump
/// the queue while waiting for a producer.
fn handle_get_data(
    object: &TransferObject,
    id: u32,
    format: WireFormat,
) -> Result<Message, TransferError> {
    let medium = object.get_data(&FormatSpec::from(format))?;
    let tag = match &medium {
        Medium::Memory(_) => MediumTag::Memory,
        Medium::Stream(_) => MediumTag::Stream,
        Medium::Storage(_) => MediumTag::Storage,
    };
    let content = medium.read_all()?;
    tracing::debug!(object = %object.id(), format = format.format, medium = ?tag, size = content.len(), "data served");
    Ok(Message::Response {
        id,
        status: Status::Ok,
        error: None,
        object: None,
        count: None,
        available: None,
        formats: None,
        medium: Some(tag),
        content: Some(content),
    })
}

// -- Helpers --

/// Run `f` against a live object, mapping failures to error responses.
fn with_object<F>(state: &ShellState, id: u32, object: u64, f: F) -> Message
where
    F: FnOnce(&Arc<TransferObject>) -> Result<Message, TransferError>,
{
    let Some(object) = state.lookup(object) else {
        return error_response(id, "object_not_found");
    };
    match f(&object) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(object = %object.id(), error = %e, "request failed");
            error_response(id, e.reason())
        }
    }
}

fn decode_payload(kind: PayloadKind, data: Vec<u8>) -> Result<Payload, &'static str> {
    match kind {
        PayloadKind::Text => String::from_utf8(data)
            .map(Payload::Text)
            .map_err(|_| "text is not UTF-8"),
        PayloadKind::File => String::from_utf8(data)
            .map(|path| Payload::File(PathBuf::from(path)))
            .map_err(|_| "path is not UTF-8"),
        PayloadKind::Image => image::load_from_memory(&data)
            .map(|image| Payload::Image(Arc::new(image)))
            .map_err(|_| "image could not be decoded"),
    }
}

fn wire_medium(state: &ShellState, tag: MediumTag, content: Vec<u8>) -> Medium {
    match tag {
        MediumTag::Memory => Medium::Memory(Bytes::from(content)),
        MediumTag::Storage => Medium::Storage(Arc::from(content)),
        MediumTag::Stream => {
            let len = content.len();
            let region = SharedRegion::from_slice(&content);
            Medium::stream(SharedMemoryStream::new(region, len, None, state.queue()))
        }
    }
}

fn count_response(id: u32, count: u32) -> Message {
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        object: None,
        count: Some(count),
        available: None,
        formats: None,
        medium: None,
        content: None,
    }
}

fn ok_response(id: u32) -> Message {
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        object: None,
        count: None,
        available: None,
        formats: None,
        medium: None,
        content: None,
    }
}

fn error_response(id: u32, reason: &str) -> Message {
    Message::Response {
        id,
        status: Status::Error,
        error: Some(reason.into()),
        object: None,
        count: None,
        available: None,
        formats: None,
        medium: None,
        content: None,
    }
}
