//! Inbound setpoint updates.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use telelink_core::{InboundMessage, SharedState, SubscriptionHandler, parse_setpoint};

use crate::config::SetpointConfig;

/// Writes setpoints received on the configured topic into shared state.
///
/// Payloads are integer Fahrenheit values in plain text. Values outside
/// `min..=max` are clamped; payloads that do not parse are logged and ignored.
#[derive(Debug)]
pub struct SetpointHandler {
    state: Arc<SharedState>,
    config: SetpointConfig,
}

impl SetpointHandler {
    /// Create a handler writing into `state`.
    pub fn new(state: Arc<SharedState>, config: SetpointConfig) -> Self {
        Self { state, config }
    }

    /// Apply a setpoint payload. Returns the stored setpoint if it changed.
    pub async fn apply(&self, payload: &[u8]) -> Option<i32> {
        let requested = match parse_setpoint(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring setpoint payload: {}", e);
                return None;
            }
        };

        let setpoint = requested.clamp(self.config.min, self.config.max);
        if setpoint != requested {
            warn!(
                "Setpoint {}°F outside {}..={}, using {}°F",
                requested, self.config.min, self.config.max, setpoint
            );
        }

        if !self.state.setpoint.set(setpoint).await {
            debug!("Setpoint unchanged at {}°F", setpoint);
            return None;
        }
        info!("Setpoint changed to {}°F", setpoint);
        self.state.display.raise();
        Some(setpoint)
    }
}

#[async_trait]
impl SubscriptionHandler for SetpointHandler {
    async fn on_message(&self, message: &InboundMessage) {
        if message.topic != self.config.topic {
            debug!("No handler for topic '{}'", message.topic);
            return;
        }
        self.apply(&message.payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> (SetpointHandler, Arc<SharedState>) {
        let state = Arc::new(SharedState::new(68, 70));
        (
            SetpointHandler::new(Arc::clone(&state), SetpointConfig::default()),
            state,
        )
    }

    #[tokio::test]
    async fn test_setpoint_update_raises_display() {
        let (handler, state) = handler();
        handler
            .on_message(&InboundMessage::new("thermostat/setpoint", "74"))
            .await;
        assert_eq!(state.setpoint.get().await, 74);
        assert_eq!(state.display.raised_count(), 1);

        // Same value again: nothing to redraw.
        handler
            .on_message(&InboundMessage::new("thermostat/setpoint", "74"))
            .await;
        assert_eq!(state.display.raised_count(), 1);
    }

    #[tokio::test]
    async fn test_setpoint_is_clamped() {
        let (handler, state) = handler();
        assert_eq!(handler.apply(b"120").await, Some(90));
        assert_eq!(state.setpoint.get().await, 90);
        assert_eq!(handler.apply(b"-4").await, Some(50));
    }

    #[tokio::test]
    async fn test_bad_payload_and_other_topics_are_ignored() {
        let (handler, state) = handler();
        handler
            .on_message(&InboundMessage::new("thermostat/setpoint", "warm"))
            .await;
        handler
            .on_message(&InboundMessage::new("thermostat/other", "60"))
            .await;
        assert_eq!(state.setpoint.get().await, 70);
        assert_eq!(state.display.raised_count(), 0);
    }

    #[tokio::test]
    async fn test_mode_is_left_to_the_sampler() {
        let (handler, state) = handler();
        handler.apply(b"60").await;
        assert_eq!(state.mode.get().await, telelink_core::Mode::Heat);
    }
}
