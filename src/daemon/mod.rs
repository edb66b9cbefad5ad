//! Transfer daemon: hosts transfer objects for desktop shell clients.
//!
//! Listens on a Unix domain socket. Connection tasks forward requests to
//! a single shell thread, which owns the task queue and every transfer
//! object; producers run on the tokio runtime and report back through
//! that queue.
//!
//! Shutdown order: stop accepting, release every object on the shell
//! thread, join it, fire pending temp-file removals and wait for them,
//! then remove the socket.

mod connection;
mod handler;
mod shell;
mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;

use shell::{Shell, ShellHandle};
use state::{ConnectionId, ShellState};

use crate::encode::{CodecImageEncoder, ImageEncoder};
use crate::fetch::FileFetchChannel;
use crate::icon::DiskIconCache;
use crate::sync::TaskQueue;
use crate::transfer::{CleanupScope, Services, TransferConfig};

/// Daemon startup/runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("$XDG_RUNTIME_DIR is not set")]
    NoRuntimeDir,
    #[error("daemon already running at {0}")]
    AlreadyRunning(PathBuf),
    #[error("failed to create directory {path}: {source}")]
    MkdirFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to bind socket {path}: {source}")]
    BindFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to start shell thread: {0}")]
    ShellThread(std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub transfer: TransferConfig,
    /// Where favicons for internet shortcuts are cached.
    pub icon_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            icon_dir: std::env::temp_dir().join("xferd").join("icons"),
        }
    }
}

/// Run the daemon until SIGTERM or SIGINT.
///
/// # Errors
///
/// Returns `DaemonError` if `$XDG_RUNTIME_DIR` is unset, socket bind
/// fails, or another daemon is already running.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    let socket_path = resolve_socket_path()?;
    let listener = bind_socket(&socket_path).await?;
    tracing::info!(path = %socket_path.display(), "daemon listening");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    };

    serve(listener, config, shutdown).await?;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::warn!(error = %e, path = %socket_path.display(), "failed to remove socket");
    }
    tracing::info!("daemon stopped");
    Ok(())
}

/// Accept connections on `listener` until `shutdown` completes, then tear
/// down every object and wait for pending cleanup.
async fn serve(
    listener: UnixListener,
    config: DaemonConfig,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), DaemonError> {
    let services = build_services(&config, Handle::current());
    let cleanup = services.cleanup.clone();
    let queue = services.queue.clone();
    let shell = Shell::spawn(queue, ShellState::new(config.transfer, services))
        .map_err(DaemonError::ShellThread)?;
    let handle = shell.handle();

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, _addr)) => accept_connection(stream, &handle),
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            () = &mut shutdown => break,
        }
    }
    drop(listener);

    // Joining blocks until queued requests have drained.
    if tokio::task::spawn_blocking(move || shell.stop()).await.is_err() {
        tracing::error!("shell shutdown panicked");
    }
    cleanup.shutdown();
    cleanup.wait().await;
    Ok(())
}

fn build_services(config: &DaemonConfig, runtime: Handle) -> Services {
    let encoder: Arc<dyn ImageEncoder> = Arc::new(CodecImageEncoder);
    Services {
        queue: TaskQueue::new(),
        fetcher: Arc::new(FileFetchChannel::new(runtime.clone())),
        encoder: Arc::clone(&encoder),
        icons: Arc::new(DiskIconCache::new(
            config.icon_dir.clone(),
            encoder,
            runtime.clone(),
        )),
        cleanup: CleanupScope::new(runtime),
    }
}

fn accept_connection(stream: UnixStream, shell: &ShellHandle) {
    let conn_id = ConnectionId::new();
    connection::spawn_connection(stream, conn_id, shell.clone());
    tracing::debug!(?conn_id, "accepted connection");
}

// -- Socket setup --

/// Resolve the daemon socket path from `$XDG_RUNTIME_DIR`.
pub fn resolve_socket_path() -> Result<PathBuf, DaemonError> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").map_err(|_| DaemonError::NoRuntimeDir)?;
    Ok(PathBuf::from(runtime_dir).join("xferd").join("daemon.sock"))
}

/// Create the socket directory (mode 0700) and bind the Unix listener.
///
/// On EADDRINUSE, connects to the existing socket: success means another
/// daemon is running; failure means the socket is stale and is replaced.
async fn bind_socket(path: &Path) -> Result<UnixListener, DaemonError> {
    let bind_failed = |source| DaemonError::BindFailed {
        path: path.to_path_buf(),
        source,
    };
    let parent = path
        .parent()
        .ok_or_else(|| bind_failed(std::io::ErrorKind::InvalidInput.into()))?;
    let mkdir_failed = |source| DaemonError::MkdirFailed {
        path: parent.to_path_buf(),
        source,
    };
    if !parent.exists() {
        std::fs::create_dir_all(parent).map_err(mkdir_failed)?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
            .map_err(mkdir_failed)?;
    }

    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if UnixStream::connect(path).await.is_ok() {
                return Err(DaemonError::AlreadyRunning(path.to_path_buf()));
            }
            tracing::info!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path).map_err(bind_failed)?;
            UnixListener::bind(path).map_err(bind_failed)
        }
        Err(e) => Err(bind_failed(e)),
    }
}
