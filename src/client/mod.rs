//! CLI client for daemon operations.
//!
//! One-shot commands: connect, perform a single request, print the
//! result, exit. Object references outlive the connection, so an object
//! offered by one invocation is addressed by id in the next.

mod daemon_client;
mod format;

use std::io::Read;
use std::path::PathBuf;

use crate::cli::{ClientAction, OfferArgs};
use crate::ipc::protocol::{OfferEntry, PayloadKind, WireDirection};
use crate::source::flavors;
use daemon_client::DaemonClient;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("daemon: {0}")]
    Daemon(String),
    #[error("invalid arguments: {0}")]
    Usage(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the client command. Called from `main.rs` for `Command::Client`.
pub async fn run(action: ClientAction) -> Result<(), ClientError> {
    // Validate before connecting so usage errors do not need a daemon.
    let offer = match &action {
        ClientAction::Offer(args) => Some(offer_entries(args)?),
        _ => None,
    };

    let socket_path =
        crate::daemon::resolve_socket_path().map_err(|e| ClientError::Daemon(e.to_string()))?;
    let mut daemon = DaemonClient::connect(&socket_path).await?;

    match action {
        ClientAction::Offer(args) => {
            let entries = offer.unwrap_or_default();
            let (object, count) = daemon.offer(entries, args.source_url).await?;
            format::print_offer(object, count);
        }
        ClientAction::AddRef { object } => {
            let count = daemon.add_ref(object).await?;
            format::print_count("Referenced", object, count);
        }
        ClientAction::Release { object } => {
            let count = daemon.release(object).await?;
            format::print_count("Released", object, count);
        }
        ClientAction::Formats { object, set } => {
            let direction = if set {
                WireDirection::Set
            } else {
                WireDirection::Get
            };
            let formats = daemon.enum_formats(object, direction).await?;
            format::print_formats(&formats);
        }
        ClientAction::Query { object, format } => {
            let available = daemon.query_get_data(object, format.to_wire()).await?;
            format::print_query(available);
        }
        ClientAction::Get {
            object,
            format,
            output,
        } => {
            let fetched = daemon.get_data(object, format.to_wire()).await?;
            format::print_data(&fetched, output.as_deref())?;
        }
        ClientAction::Set {
            object,
            format,
            medium,
            input,
            copy,
        } => {
            let content = read_input(input)?;
            daemon
                .set_data(object, format.to_wire(), medium.tag(), content, !copy)
                .await?;
            format::print_done("Data stored", object);
        }
        ClientAction::StartOp { object } => {
            daemon.start_operation(object).await?;
            format::print_done("Operation started", object);
        }
        ClientAction::EndOp { object } => {
            daemon.end_operation(object).await?;
            format::print_done("Operation ended", object);
        }
    }

    Ok(())
}

/// Build the flavor list of an offer, most specific flavors first.
fn offer_entries(args: &OfferArgs) -> Result<Vec<OfferEntry>, ClientError> {
    let mut entries = Vec::new();
    let mut text = |flavor: &str, value: String| {
        entries.push(OfferEntry {
            flavor: flavor.into(),
            kind: PayloadKind::Text,
            data: value.into_bytes(),
        })
    };

    if let Some(promise_url) = &args.promise_url {
        text(flavors::FILE_PROMISE, String::new());
        text(flavors::FILE_PROMISE_URL, promise_url.clone());
        if let Some(name) = &args.promise_name {
            text(flavors::FILE_PROMISE_DEST_FILENAME, name.clone());
        }
    }
    if let Some(url) = &args.url {
        let line = match &args.title {
            Some(title) => format!("{url}\n{title}"),
            None => url.clone(),
        };
        text(flavors::URL, line);
    }
    if let Some(html) = &args.html {
        text(flavors::HTML, html.clone());
    }
    if let Some(value) = &args.text {
        text(flavors::TEXT, value.clone());
    }

    if let Some(path) = &args.file {
        let path = std::path::absolute(path)?;
        entries.insert(
            0,
            OfferEntry {
                flavor: flavors::FILE.into(),
                kind: PayloadKind::File,
                data: path.to_string_lossy().into_owned().into_bytes(),
            },
        );
    }
    if let Some(path) = &args.image {
        entries.push(OfferEntry {
            flavor: flavors::NATIVE_IMAGE.into(),
            kind: PayloadKind::Image,
            data: std::fs::read(path)?,
        });
    }

    if entries.is_empty() {
        return Err(ClientError::Usage(
            "offer needs at least one of --text, --html, --url, --file, --image, --promise-url"
                .into(),
        ));
    }
    Ok(entries)
}

fn read_input(input: Option<PathBuf>) -> Result<Vec<u8>, ClientError> {
    match input {
        Some(path) => Ok(std::fs::read(path)?),
        None => {
            let mut content = Vec::new();
            std::io::stdin().lock().read_to_end(&mut content)?;
            Ok(content)
        }
    }
}
