use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::format::{self, Aspect, MediumKinds};
use crate::ipc::protocol::{MediumTag, WireFormat};
use crate::transfer::ImageFileFormat;

#[derive(Parser)]
#[command(name = "xferd", about = "Content-transfer daemon for desktop shells")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the transfer daemon
    Serve {
        /// Delay before a released object's temporary file is removed
        #[arg(long, default_value_t = 500)]
        cleanup_grace_ms: u64,

        /// File type used when an image is dropped as a file
        #[arg(long, value_enum, default_value_t = ImageFileFormat::Png)]
        image_file_format: ImageFileFormat,

        /// Leave favicon lines out of internet shortcuts
        #[arg(long)]
        no_shortcut_favicons: bool,

        /// Directory for materialized drop files
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Directory for cached shortcut favicons
        #[arg(long)]
        icon_dir: Option<PathBuf>,
    },

    /// One-shot requests against a running daemon
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Subcommand)]
pub enum ClientAction {
    /// Offer content and print the new object id
    Offer(OfferArgs),

    /// Take a reference on an object
    AddRef { object: u64 },

    /// Drop a reference on an object
    Release { object: u64 },

    /// List the formats an object offers
    Formats {
        object: u64,

        /// Enumerate settable formats instead
        #[arg(long)]
        set: bool,
    },

    /// Ask whether a format can be rendered
    Query {
        object: u64,
        #[command(flatten)]
        format: FormatArgs,
    },

    /// Render a format; content goes to stdout or --output
    Get {
        object: u64,
        #[command(flatten)]
        format: FormatArgs,

        /// Write content to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Store data under a format
    Set {
        object: u64,
        #[command(flatten)]
        format: FormatArgs,

        /// Medium the data is handed over in
        #[arg(long, value_enum, default_value_t = MediumArg::Memory)]
        medium: MediumArg,

        /// File whose bytes are stored; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,

        /// Make the daemon keep a private copy
        #[arg(long)]
        copy: bool,
    },

    /// Mark an asynchronous transfer as started
    StartOp { object: u64 },

    /// Mark an asynchronous transfer as finished
    EndOp { object: u64 },
}

#[derive(Args, Debug, Default)]
pub struct OfferArgs {
    #[arg(long)]
    pub text: Option<String>,

    #[arg(long)]
    pub html: Option<String>,

    /// Link target, offered together with --title as a URL
    #[arg(long)]
    pub url: Option<String>,

    #[arg(long, requires = "url")]
    pub title: Option<String>,

    /// Existing file to offer
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// PNG, BMP or ICO file to offer as an image
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Promise a file downloaded from this URL
    #[arg(long)]
    pub promise_url: Option<String>,

    /// File name for the promised download
    #[arg(long, requires = "promise_url")]
    pub promise_name: Option<String>,

    /// Page the content came from
    #[arg(long)]
    pub source_url: Option<String>,
}

#[derive(Args, Debug)]
pub struct FormatArgs {
    /// Format name (e.g. CF_UNICODETEXT, "HTML Format") or numeric id
    #[arg(value_parser = parse_format_arg)]
    pub format: u32,

    /// Acceptable media
    #[arg(long, value_enum, num_args = 1.., default_values_t = [MediumArg::Memory])]
    pub media: Vec<MediumArg>,

    /// Aspect bits
    #[arg(long, default_value_t = Aspect::CONTENT.bits())]
    pub aspect: u32,

    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub index: i32,
}

impl FormatArgs {
    pub fn to_wire(&self) -> WireFormat {
        let media = self
            .media
            .iter()
            .fold(MediumKinds::empty(), |acc, medium| acc | medium.kinds());
        WireFormat {
            format: self.format,
            aspect: self.aspect,
            media: media.bits(),
            index: self.index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MediumArg {
    Memory,
    Stream,
    Storage,
}

impl MediumArg {
    fn kinds(self) -> MediumKinds {
        match self {
            MediumArg::Memory => MediumKinds::MEMORY,
            MediumArg::Stream => MediumKinds::STREAM,
            MediumArg::Storage => MediumKinds::STORAGE,
        }
    }

    pub fn tag(self) -> MediumTag {
        match self {
            MediumArg::Memory => MediumTag::Memory,
            MediumArg::Stream => MediumTag::Stream,
            MediumArg::Storage => MediumTag::Storage,
        }
    }
}

fn parse_format_arg(text: &str) -> Result<u32, String> {
    format::parse_format(text).ok_or_else(|| format!("unknown format: {text}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn get_parses_named_format_and_media() {
        let cli = Cli::parse_from([
            "xferd", "client", "get", "7", "FileContents", "--media", "memory", "stream",
        ]);
        let Command::Client {
            action: ClientAction::Get { object, format, .. },
        } = cli.command
        else {
            panic!("expected client get");
        };
        assert_eq!(object, 7);
        let wire = format.to_wire();
        assert_eq!(wire.format, format::FILE_CONTENTS);
        assert_eq!(wire.media, (MediumKinds::MEMORY | MediumKinds::STREAM).bits());
        assert_eq!(wire.aspect, 1);
        assert_eq!(wire.index, -1);
    }

    #[test]
    fn unknown_format_name_is_rejected() {
        let parsed = Cli::try_parse_from(["xferd", "client", "query", "1", "CF_NOPE"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::parse_from(["xferd", "serve"]);
        let Command::Serve {
            cleanup_grace_ms,
            image_file_format,
            no_shortcut_favicons,
            ..
        } = cli.command
        else {
            panic!("expected serve");
        };
        assert_eq!(cleanup_grace_ms, 500);
        assert_eq!(image_file_format, ImageFileFormat::Png);
        assert!(!no_shortcut_favicons);
    }
}
