//! Session event callback.
//!
//! Runs on whatever task the messaging library delivers events on. It never
//! touches the ledger or calls back into the session; it only flips the
//! session-connected flag and hands work to the controller through the
//! command queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::commands::{CommandSender, PendingCommand};
use crate::config::InboundRouting;
use crate::session::{SessionEvent, SessionHandle};
use crate::traits::{SessionCallback, SubscriptionHandler};

/// Flag the callback clears when the broker drops the session.
///
/// Separate from the ledger: the ledger still records `SessionConnected`
/// until the controller's own disconnect call succeeds.
#[derive(Debug, Clone, Default)]
pub struct SessionFlag(Arc<AtomicBool>);

impl SessionFlag {
    /// Create a cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session is believed connected.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Set or clear the flag.
    pub fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Release);
    }
}

/// [`SessionCallback`] that turns session events into controller commands.
pub struct EventCallback {
    commands: CommandSender,
    handler: Arc<dyn SubscriptionHandler>,
    routing: InboundRouting,
    flag: SessionFlag,
    warn_after: Duration,
}

impl EventCallback {
    /// Create a callback feeding `commands`.
    pub fn new(
        commands: CommandSender,
        handler: Arc<dyn SubscriptionHandler>,
        routing: InboundRouting,
        flag: SessionFlag,
        warn_after: Duration,
    ) -> Self {
        Self {
            commands,
            handler,
            routing,
            flag,
            warn_after,
        }
    }

    async fn enqueue(&self, command: PendingCommand) {
        if self
            .commands
            .send_patiently(command, self.warn_after)
            .await
            .is_err()
        {
            debug!("Controller gone; dropping session event");
        }
    }
}

#[async_trait]
impl SessionCallback for EventCallback {
    async fn on_event(&self, handle: SessionHandle, event: SessionEvent) {
        match event {
            SessionEvent::Disconnected => {
                self.flag.set(false);
                warn!("Session {} unexpectedly disconnected from broker", handle);
                self.enqueue(PendingCommand::Disconnected).await;
            }
            SessionEvent::MessageReceived(message) => match self.routing {
                InboundRouting::Inline => {
                    debug!("Inbound message on '{}'", message.topic);
                    self.handler.on_message(&message).await;
                }
                InboundRouting::Deferred => {
                    self.enqueue(PendingCommand::MessageReceived(message)).await;
                }
            },
            SessionEvent::PublishFailed { topic, reason } => {
                warn!("Publish to '{}' failed: {}", topic, reason);
                self.enqueue(PendingCommand::PublishFailed { topic }).await;
            }
            SessionEvent::SubscribeFailed { topic, reason } => {
                warn!("Subscribe to '{}' failed: {}", topic, reason);
                self.enqueue(PendingCommand::SubscribeFailed { topic }).await;
            }
            SessionEvent::Other(description) => {
                info!("Unhandled session event on {}: {}", handle, description);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::command_queue;
    use crate::mock::RecordingHandler;
    use crate::session::InboundMessage;

    fn callback(
        routing: InboundRouting,
    ) -> (
        EventCallback,
        crate::commands::CommandReceiver,
        Arc<RecordingHandler>,
        SessionFlag,
    ) {
        let (tx, rx) = command_queue(4);
        let handler = Arc::new(RecordingHandler::new());
        let flag = SessionFlag::new();
        flag.set(true);
        let callback = EventCallback::new(
            tx,
            handler.clone(),
            routing,
            flag.clone(),
            Duration::from_secs(1),
        );
        (callback, rx, handler, flag)
    }

    #[tokio::test]
    async fn test_disconnect_clears_flag_and_enqueues() {
        let (callback, mut rx, _, flag) = callback(InboundRouting::Inline);
        callback
            .on_event(SessionHandle(1), SessionEvent::Disconnected)
            .await;
        assert!(!flag.is_set());
        assert_eq!(rx.try_recv(), Some(PendingCommand::Disconnected));
    }

    #[tokio::test]
    async fn test_inline_message_goes_to_handler() {
        let (callback, mut rx, handler, _) = callback(InboundRouting::Inline);
        let message = InboundMessage::new("thermostat/setpoint", "72");
        callback
            .on_event(SessionHandle(1), SessionEvent::MessageReceived(message.clone()))
            .await;
        assert_eq!(handler.messages(), vec![message]);
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_deferred_message_is_queued() {
        let (callback, mut rx, handler, _) = callback(InboundRouting::Deferred);
        let message = InboundMessage::new("thermostat/setpoint", "72");
        callback
            .on_event(SessionHandle(1), SessionEvent::MessageReceived(message.clone()))
            .await;
        assert!(handler.messages().is_empty());
        assert_eq!(rx.try_recv(), Some(PendingCommand::MessageReceived(message)));
    }

    #[tokio::test]
    async fn test_publish_failure_is_queued() {
        let (callback, mut rx, _, flag) = callback(InboundRouting::Inline);
        callback
            .on_event(
                SessionHandle(1),
                SessionEvent::PublishFailed {
                    topic: "thermostat/mode".into(),
                    reason: "rejected".into(),
                },
            )
            .await;
        assert!(flag.is_set());
        assert_eq!(
            rx.try_recv(),
            Some(PendingCommand::PublishFailed {
                topic: "thermostat/mode".into()
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let (callback, mut rx, _, flag) = callback(InboundRouting::Inline);
        callback
            .on_event(SessionHandle(1), SessionEvent::Other("pingresp".into()))
            .await;
        assert!(flag.is_set());
        assert_eq!(rx.try_recv(), None);
    }
}
