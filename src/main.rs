mod cli;
mod client;
mod daemon;
mod encode;
mod fetch;
mod format;
mod icon;
mod ipc;
mod medium;
mod source;
mod stream;
mod sync;
mod transfer;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            cleanup_grace_ms,
            image_file_format,
            no_shortcut_favicons,
            temp_dir,
            icon_dir,
        } => {
            let defaults = daemon::DaemonConfig::default();
            let config = daemon::DaemonConfig {
                transfer: transfer::TransferConfig {
                    cleanup_grace: Duration::from_millis(cleanup_grace_ms),
                    image_file_format,
                    shortcut_favicons: !no_shortcut_favicons,
                    temp_dir: temp_dir.unwrap_or(defaults.transfer.temp_dir),
                    ..defaults.transfer
                },
                icon_dir: icon_dir.unwrap_or(defaults.icon_dir),
            };
            if let Err(e) = daemon::run(config).await {
                tracing::error!(error = %e, "daemon failed");
                eprintln!("xferd serve: {e}");
                std::process::exit(1);
            }
        }
        Command::Client { action } => {
            if let Err(e) = client::run(action).await {
                tracing::error!(error = %e, "client failed");
                eprintln!("xferd client: {e}");
                std::process::exit(1);
            }
        }
    }
}
