use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::commands::{CommandSender, PendingCommand};
use crate::config::SessionOptions;
use crate::session::{Qos, SessionHandle};
use crate::state::SharedState;
use crate::traits::MessagingSession;

/// Publishes temperature and mode as plain-text payloads when notified.
pub struct Publisher {
    session: Arc<dyn MessagingSession>,
    handle: SessionHandle,
    state: Arc<SharedState>,
    commands: CommandSender,
    temperature_topic: String,
    mode_topic: String,
    qos: Qos,
}

impl Publisher {
    /// Create a publisher for `handle`.
    pub fn new(
        session: Arc<dyn MessagingSession>,
        handle: SessionHandle,
        state: Arc<SharedState>,
        commands: CommandSender,
        options: &SessionOptions,
    ) -> Self {
        Self {
            session,
            handle,
            state,
            commands,
            temperature_topic: options.temperature_topic(),
            mode_topic: options.mode_topic(),
            qos: options.qos,
        }
    }

    /// Publish on every notification until `token` is cancelled.
    ///
    /// A failed publish is reported to the controller, which stops this
    /// activity.
    pub async fn run(self, token: CancellationToken) {
        while let Some(changes) = self.state.publisher.take_or_cancel(&token).await {
            if changes.temperature {
                let temperature = self.state.temperature.get().await;
                if !self
                    .publish(&self.temperature_topic, temperature.to_string(), &token)
                    .await
                {
                    continue;
                }
            }
            if changes.mode {
                let mode = self.state.mode.get().await;
                self.publish(&self.mode_topic, mode.as_str().to_string(), &token)
                    .await;
            }
        }
    }

    async fn publish(&self, topic: &str, payload: String, token: &CancellationToken) -> bool {
        match self
            .session
            .publish(self.handle, topic, Bytes::from(payload), self.qos)
            .await
        {
            Ok(()) => {
                debug!("Published to '{}'", topic);
                true
            }
            Err(e) => {
                warn!("Publish to '{}' failed: {}", topic, e);
                let command = PendingCommand::PublishFailed {
                    topic: topic.to_string(),
                };
                if self.commands.send_or_cancel(command, token).await.is_err() {
                    debug!("Publish failure not reported; publisher stopping");
                }
                false
            }
        }
    }
}
