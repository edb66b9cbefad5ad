//! Per-connection task: framed I/O, handshake, request forwarding.
//!
//! Each client connection spawns a tokio task that:
//! 1. Wraps the socket in a length-prefixed MessagePack codec.
//! 2. Reads the first message, which must be `Hello`, and answers it.
//! 3. Forwards every later request to the shell thread and writes the
//!    response back, one request at a time.
//!
//! Objects outlive the connection that offered them, so a disconnect
//! needs no cleanup.

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::ipc::codec::{CodecError, DecodeResult, FrameCodec, decode_frame};
use crate::ipc::protocol::{Message, Status};

use super::shell::{ShellError, ShellHandle};
use super::state::ConnectionId;

/// Connection-level errors.
#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("unexpected EOF during handshake")]
    HandshakeEof,
    #[error("first message must be Hello")]
    NotHello,
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] rmp_serde::decode::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("shell: {0}")]
    Shell(#[from] ShellError),
}

/// Spawn a connection handler task.
///
/// The task runs until the client disconnects or a protocol error occurs.
pub fn spawn_connection(stream: UnixStream, conn_id: ConnectionId, shell: ShellHandle) {
    tokio::spawn(async move {
        match handle_connection(stream, &shell).await {
            Ok(()) => tracing::debug!(?conn_id, "connection closed"),
            Err(e) => tracing::debug!(?conn_id, error = %e, "connection closed"),
        }
    });
}

async fn handle_connection(stream: UnixStream, shell: &ShellHandle) -> Result<(), ConnectionError> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    // -- Handshake: first message must be Hello --
    let first_frame = framed
        .next()
        .await
        .ok_or(ConnectionError::HandshakeEof)??;

    let hello = match decode_frame(&first_frame) {
        DecodeResult::Ok(msg @ Message::Hello { .. }) => msg,
        DecodeResult::Ok(_) | DecodeResult::UnknownType(_) => {
            return Err(ConnectionError::NotHello);
        }
        DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
    };

    let ack = shell.submit(hello).await?;
    let rejected = matches!(
        ack,
        Message::HelloAck {
            status: Status::Error,
            ..
        }
    );
    framed.send(ack).await?;
    if rejected {
        return Ok(());
    }

    // -- Main loop --
    while let Some(frame) = framed.next().await {
        let raw = frame?;
        let response = match decode_frame(&raw) {
            DecodeResult::Ok(msg) => shell.submit(msg).await?,
            DecodeResult::UnknownType(envelope) => {
                tracing::debug!(id = envelope.id, kind = %envelope.msg_type, "unknown message type");
                Message::Response {
                    id: envelope.id,
                    status: Status::Error,
                    error: Some("unknown_type".into()),
                    object: None,
                    count: None,
                    available: None,
                    formats: None,
                    medium: None,
                    content: None,
                }
            }
            DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
        };
        framed.send(response).await?;
    }
    Ok(())
}
