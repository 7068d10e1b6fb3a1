//! Request/reply channel to a dedicated device thread.
//!
//! Blocking SDK calls run on the worker thread; the caller waits for the
//! matching reply with a deadline. A reply that arrives after its request
//! timed out is discarded when the next request waits.

use super::TransportError;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Commands tagged with a request id, as seen by the worker.
pub(crate) type Requests<C> = Receiver<(u64, C)>;

/// Reply sink handed to the worker.
pub(crate) type Replies<R> = Sender<(u64, R)>;

/// Caller side of a worker thread.
pub(crate) struct Worker<C, R> {
    commands: Option<Sender<(u64, C)>>,
    replies: Receiver<(u64, R)>,
    next_request: u64,
}

impl<C, R> Worker<C, R>
where
    C: Send + 'static,
    R: Send + 'static,
{
    /// Spawns a named thread running `serve` until the command channel closes.
    pub(crate) fn spawn<F>(name: &str, serve: F) -> io::Result<Self>
    where
        F: FnOnce(Requests<C>, Replies<R>) + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || serve(command_rx, reply_tx))?;
        Ok(Self {
            commands: Some(command_tx),
            replies: reply_rx,
            next_request: 1,
        })
    }

    /// Sends a command and waits up to `timeout` for its reply.
    pub(crate) fn request(&mut self, command: C, timeout: Duration) -> Result<R, TransportError> {
        let commands = self.commands.as_ref().ok_or(TransportError::NotOpen)?;
        let id = self.next_request;
        self.next_request += 1;
        commands.send((id, command)).map_err(|_| stopped())?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok((reply_id, reply)) if reply_id == id => return Ok(reply),
                Ok((stale, _)) => {
                    tracing::debug!(request = stale, "Discarded late worker reply");
                }
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(stopped()),
            }
        }
    }

    /// Closes the command channel. The thread exits after its current command.
    pub(crate) fn shutdown(&mut self) {
        self.commands = None;
    }

    /// True until [`Worker::shutdown`] is called.
    pub(crate) fn is_running(&self) -> bool {
        self.commands.is_some()
    }
}

fn stopped() -> TransportError {
    TransportError::Acquisition("device worker thread stopped".into())
}
