//! Output formatting for CLI client commands.
//!
//! Status lines and tables go to stdout. For `get`, metadata goes to
//! stderr and raw content to stdout so piping works
//! (`xferd client get 3 CF_HDROP | xxd`).

use std::io::{self, Write};
use std::path::Path;

use crate::format::{Aspect, MediumKinds};
use crate::ipc::protocol::{FormatDescriptor, MediumTag};

use super::daemon_client::Fetched;

pub fn print_offer(object: u64, count: u32) {
    println!("Offered object {object} (refs: {count})");
}

pub fn print_count(verb: &str, object: u64, count: u32) {
    println!("{verb} object {object} (refs: {count})");
}

/// Print format descriptors as a table to stdout.
pub fn print_formats(formats: &[FormatDescriptor]) {
    if formats.is_empty() {
        println!("No formats offered");
        return;
    }

    println!("{:<32} {:>8} {:<10} {:<16} INDEX", "NAME", "ID", "ASPECT", "MEDIA");
    println!("{}", "-".repeat(78));
    for f in formats {
        println!(
            "{:<32} {:>8} {:<10} {:<16} {}",
            f.name,
            format!("0x{:04X}", f.spec.format),
            aspect_names(f.spec.aspect),
            media_names(f.spec.media),
            f.spec.index,
        );
    }
}

pub fn print_query(available: bool) {
    if available {
        println!("available");
    } else {
        println!("not available");
    }
}

/// Print fetched data: a header on stderr, content to stdout or `output`.
pub fn print_data(fetched: &Fetched, output: Option<&Path>) -> Result<(), io::Error> {
    eprintln!("Medium: {}", medium_name(fetched.medium));
    eprintln!("Size:   {} bytes", fetched.content.len());
    match output {
        Some(path) => {
            std::fs::write(path, &fetched.content)?;
            eprintln!("Written to {}", path.display());
        }
        None => {
            eprintln!("---");
            let mut stdout = io::stdout().lock();
            stdout.write_all(&fetched.content)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

pub fn print_done(what: &str, object: u64) {
    println!("{what} on object {object}");
}

fn medium_name(medium: MediumTag) -> &'static str {
    match medium {
        MediumTag::Memory => "memory",
        MediumTag::Stream => "stream",
        MediumTag::Storage => "storage",
    }
}

/// `memory|stream` style rendering of a medium bit set.
fn media_names(bits: u32) -> String {
    let kinds = MediumKinds::from_bits_truncate(bits);
    let names: Vec<_> = [
        (MediumKinds::MEMORY, "memory"),
        (MediumKinds::FILE, "file"),
        (MediumKinds::STREAM, "stream"),
        (MediumKinds::STORAGE, "storage"),
    ]
    .into_iter()
    .filter(|(kind, _)| kinds.contains(*kind))
    .map(|(_, name)| name)
    .collect();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join("|")
    }
}

fn aspect_names(bits: u32) -> String {
    let aspect = Aspect::from_bits_truncate(bits);
    let names: Vec<_> = [
        (Aspect::CONTENT, "content"),
        (Aspect::THUMBNAIL, "thumbnail"),
        (Aspect::ICON, "icon"),
        (Aspect::DOCPRINT, "docprint"),
    ]
    .into_iter()
    .filter(|(flag, _)| aspect.contains(*flag))
    .map(|(_, name)| name)
    .collect();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join("|")
    }
}
