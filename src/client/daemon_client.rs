//! Daemon connection for one-shot CLI commands.
//!
//! Connects, performs the handshake, then issues requests one at a time.
//! Request ids start at 1; 0 is reserved for `hello`.

use std::path::Path;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::ipc::codec::LengthPrefixedCodec;
use crate::ipc::protocol::{
    FormatDescriptor, MediumTag, Message, OfferEntry, PROTOCOL_VERSION, Status, WireDirection,
    WireFormat,
};

use super::ClientError;

/// Successful response fields.
#[derive(Debug, Default)]
pub struct Reply {
    pub object: Option<u64>,
    pub count: Option<u32>,
    pub available: Option<bool>,
    pub formats: Option<Vec<FormatDescriptor>>,
    pub medium: Option<MediumTag>,
    pub content: Option<Vec<u8>>,
}

/// Data returned by `get_data`.
#[derive(Debug)]
pub struct Fetched {
    pub medium: MediumTag,
    pub content: Vec<u8>,
}

pub struct DaemonClient {
    framed: Framed<UnixStream, LengthPrefixedCodec>,
    next_id: u32,
}

impl DaemonClient {
    /// Connect to the daemon socket and perform the handshake.
    pub async fn connect(socket_path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| ClientError::Daemon(format!("connect failed: {e}")))?;
        let mut framed = Framed::new(stream, LengthPrefixedCodec::new());

        framed
            .send(Message::Hello {
                id: 0,
                version: PROTOCOL_VERSION,
            })
            .await
            .map_err(|e| ClientError::Daemon(format!("send hello: {e}")))?;

        match framed.next().await {
            Some(Ok(Message::HelloAck {
                status: Status::Ok, ..
            })) => {}
            Some(Ok(Message::HelloAck {
                status: Status::Error,
                error,
                ..
            })) => {
                return Err(ClientError::Daemon(format!(
                    "handshake rejected: {}",
                    error.unwrap_or_default()
                )));
            }
            other => {
                return Err(ClientError::Daemon(format!(
                    "unexpected handshake response: {other:?}"
                )));
            }
        }

        Ok(Self { framed, next_id: 1 })
    }

    /// Offer content; returns the object id and its reference count.
    pub async fn offer(
        &mut self,
        entries: Vec<OfferEntry>,
        source_url: Option<String>,
    ) -> Result<(u64, u32), ClientError> {
        let reply = self
            .request("offer", |id| Message::Offer {
                id,
                entries,
                source_url,
            })
            .await?;
        match (reply.object, reply.count) {
            (Some(object), Some(count)) => Ok((object, count)),
            _ => Err(ClientError::Daemon("offer response without object".into())),
        }
    }

    pub async fn add_ref(&mut self, object: u64) -> Result<u32, ClientError> {
        let reply = self
            .request("add_ref", |id| Message::AddRef { id, object })
            .await?;
        Ok(reply.count.unwrap_or_default())
    }

    pub async fn release(&mut self, object: u64) -> Result<u32, ClientError> {
        let reply = self
            .request("release", |id| Message::Release { id, object })
            .await?;
        Ok(reply.count.unwrap_or_default())
    }

    pub async fn enum_formats(
        &mut self,
        object: u64,
        direction: WireDirection,
    ) -> Result<Vec<FormatDescriptor>, ClientError> {
        let reply = self
            .request("enum_formats", |id| Message::EnumFormats {
                id,
                object,
                direction,
            })
            .await?;
        Ok(reply.formats.unwrap_or_default())
    }

    pub async fn query_get_data(
        &mut self,
        object: u64,
        format: WireFormat,
    ) -> Result<bool, ClientError> {
        let reply = self
            .request("query_get_data", |id| Message::QueryGetData {
                id,
                object,
                format,
            })
            .await?;
        Ok(reply.available.unwrap_or(false))
    }

    pub async fn get_data(
        &mut self,
        object: u64,
        format: WireFormat,
    ) -> Result<Fetched, ClientError> {
        let reply = self
            .request("get_data", |id| Message::GetData { id, object, format })
            .await?;
        match (reply.medium, reply.content) {
            (Some(medium), content) => Ok(Fetched {
                medium,
                content: content.unwrap_or_default(),
            }),
            (None, _) => Err(ClientError::Daemon("get_data response without medium".into())),
        }
    }

    pub async fn set_data(
        &mut self,
        object: u64,
        format: WireFormat,
        medium: MediumTag,
        content: Vec<u8>,
        take_ownership: bool,
    ) -> Result<(), ClientError> {
        self.request("set_data", |id| Message::SetData {
            id,
            object,
            format,
            medium,
            content,
            take_ownership,
        })
        .await?;
        Ok(())
    }

    pub async fn start_operation(&mut self, object: u64) -> Result<(), ClientError> {
        self.request("start_operation", |id| Message::StartOperation { id, object })
            .await?;
        Ok(())
    }

    pub async fn end_operation(&mut self, object: u64) -> Result<(), ClientError> {
        self.request("end_operation", |id| Message::EndOperation { id, object })
            .await?;
        Ok(())
    }

    /// Send one request built by `build` and wait for its response.
    async fn request<F>(&mut self, op: &str, build: F) -> Result<Reply, ClientError>
    where
        F: FnOnce(u32) -> Message,
    {
        let id = self.next_id;
        self.next_id += 1;

        self.framed
            .send(build(id))
            .await
            .map_err(|e| ClientError::Daemon(format!("send {op}: {e}")))?;

        match self.framed.next().await {
            Some(Ok(Message::Response {
                id: reply_id,
                status: Status::Ok,
                object,
                count,
                available,
                formats,
                medium,
                content,
                ..
            })) if reply_id == id => Ok(Reply {
                object,
                count,
                available,
                formats,
                medium,
                content,
            }),
            Some(Ok(Message::Response {
                status: Status::Error,
                error,
                ..
            })) => Err(ClientError::Daemon(format!(
                "{op} failed: {}",
                error.unwrap_or_default()
            ))),
            other => Err(ClientError::Daemon(format!(
                "unexpected {op} response: {other:?}"
            ))),
        }
    }
}
