//! The shell thread.
//!
//! Transfer objects are only ever called from this thread: connection
//! tasks submit requests as queued tasks and await the reply.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;

use crate::ipc::protocol::Message;
use crate::sync::TaskQueue;

use super::handler;
use super::state::ShellState;

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("shell thread has stopped")]
    Stopped,
    #[error("request dropped without a response")]
    ResponseDropped,
}

/// Cloneable handle for submitting requests to the shell thread.
#[derive(Debug, Clone)]
pub struct ShellHandle {
    queue: TaskQueue,
    state: Arc<ShellState>,
}

impl ShellHandle {
    /// Handle the request on the shell thread and return its response.
    pub async fn submit(&self, request: Message) -> Result<Message, ShellError> {
        let (response_tx, response_rx) = oneshot::channel();
        let state = Arc::clone(&self.state);
        self.queue
            .post(move || {
                let response = handler::handle_message(&state, request);
                let _ = response_tx.send(response);
            })
            .map_err(|_| ShellError::Stopped)?;
        response_rx.await.map_err(|_| ShellError::ResponseDropped)
    }
}

/// Owner of the shell thread.
#[derive(Debug)]
pub struct Shell {
    handle: ShellHandle,
    thread: JoinHandle<()>,
}

impl Shell {
    /// Start the shell thread; it runs `queue` as its main loop.
    pub fn spawn(queue: TaskQueue, state: ShellState) -> std::io::Result<Self> {
        let runner = queue.clone();
        let thread = std::thread::Builder::new()
            .name("xferd-shell".into())
            .spawn(move || runner.run())?;
        Ok(Self {
            handle: ShellHandle {
                queue,
                state: Arc::new(state),
            },
            thread,
        })
    }

    pub fn handle(&self) -> ShellHandle {
        self.handle.clone()
    }

    /// Release every object, drain the queue and join the thread.
    pub fn stop(self) {
        let state = Arc::clone(&self.handle.state);
        if self.handle.queue.post(move || state.release_all()).is_err() {
            tracing::warn!("shell queue already closed");
        }
        self.handle.queue.close();
        if self.thread.join().is_err() {
            tracing::error!("shell thread panicked");
        }
        tracing::debug!("shell thread stopped");
    }
}
