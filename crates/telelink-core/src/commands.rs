//! Command queue from activities and the session callback to the controller.
//!
//! ```text
//! +----------------+   PendingCommand   +----------------------+
//! |  publisher     | -----------------> |                      |
//! |  subscriptions | -----------------> |  LifecycleController |
//! |  EventCallback | -----------------> |                      |
//! +----------------+   (bounded FIFO)   +----------------------+
//! ```
//!
//! The controller is the only consumer. Commands come out in the order they
//! were enqueued, whoever enqueued them. A full queue makes the producer wait;
//! nothing is dropped.

use std::fmt;
use std::pin::pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::session::InboundMessage;

/// Default queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Why [`CommandSender::try_send`] handed a command back.
pub type TrySendError = mpsc::error::TrySendError<PendingCommand>;

/// A request for the controller to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCommand {
    /// A publish was rejected.
    PublishFailed {
        /// Topic of the failed publish.
        topic: String,
    },
    /// A subscription was rejected.
    SubscribeFailed {
        /// Topic of the failed subscription.
        topic: String,
    },
    /// The session dropped.
    Disconnected,
    /// An inbound message deferred to the controller's context.
    MessageReceived(InboundMessage),
}

impl PendingCommand {
    /// Short kind name for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            PendingCommand::PublishFailed { .. } => "publish_failed",
            PendingCommand::SubscribeFailed { .. } => "subscribe_failed",
            PendingCommand::Disconnected => "disconnected",
            PendingCommand::MessageReceived(_) => "message_received",
        }
    }

    /// Whether handling this command ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PendingCommand::MessageReceived(_))
    }
}

impl fmt::Display for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingCommand::PublishFailed { topic } => write!(f, "publish failed on '{}'", topic),
            PendingCommand::SubscribeFailed { topic } => {
                write!(f, "subscribe failed on '{}'", topic)
            }
            PendingCommand::Disconnected => f.write_str("session disconnected"),
            PendingCommand::MessageReceived(message) => {
                write!(f, "message on '{}' ({} bytes)", message.topic, message.payload.len())
            }
        }
    }
}

/// Create a bounded command queue.
///
/// A capacity of zero is raised to one.
pub fn command_queue(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Producer side of the command queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<PendingCommand>,
}

impl CommandSender {
    /// Enqueue, waiting for space if the queue is full.
    pub async fn send(&self, command: PendingCommand) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::QueueClosed)
    }

    /// Enqueue, logging a warning every `warn_after` while the queue stays full.
    ///
    /// The command keeps its place; it is never dropped.
    pub async fn send_patiently(&self, command: PendingCommand, warn_after: Duration) -> Result<()> {
        let kind = command.kind();
        let mut send = pin!(self.tx.send(command));
        let mut waited = Duration::ZERO;
        loop {
            tokio::select! {
                result = &mut send => return result.map_err(|_| Error::QueueClosed),
                _ = sleep(warn_after) => {
                    waited += warn_after;
                    warn!(
                        "Command queue full; '{}' has waited {:?} for the controller",
                        kind, waited
                    );
                }
            }
        }
    }

    /// Enqueue unless `token` is cancelled first.
    pub async fn send_or_cancel(
        &self,
        command: PendingCommand,
        token: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.send(command) => result,
        }
    }

    /// Enqueue without waiting; a full or closed queue hands the command back.
    pub fn try_send(&self, command: PendingCommand) -> std::result::Result<(), TrySendError> {
        self.tx.try_send(command)
    }

    /// Enqueue from a thread outside the runtime. Panics if called on a runtime thread.
    pub fn blocking_send(&self, command: PendingCommand) -> Result<()> {
        self.tx.blocking_send(command).map_err(|_| Error::QueueClosed)
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Whether the controller side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the command queue, owned by the controller.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<PendingCommand>,
}

impl CommandReceiver {
    /// Wait for the next command. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<PendingCommand> {
        self.rx.recv().await
    }

    /// Take the next command without waiting.
    pub fn try_recv(&mut self) -> Option<PendingCommand> {
        self.rx.try_recv().ok()
    }

    /// Drop everything still queued, returning how many commands were discarded.
    pub fn drain(&mut self) -> usize {
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}
