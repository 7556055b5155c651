//! Lifecycle event system.
//!
//! The controller and connectivity stack report what they acquire, release
//! and retry as [`LifecycleEvent`]s on a broadcast channel. Nobody has to
//! listen; sending with no receivers is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ledger::Stage;
use crate::state::ConnectivityState;

/// Events emitted during the connectivity lifecycle.
///
/// All events are serializable for logging and IPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LifecycleEvent {
    /// Connectivity state changed.
    StateChanged {
        from: ConnectivityState,
        to: ConnectivityState,
    },
    /// A stage was acquired and recorded in the ledger.
    StageAcquired { stage: Stage },
    /// A stage was released and cleared from the ledger.
    StageReleased { stage: Stage },
    /// A release call failed; the stage stays recorded.
    ReleaseFailed { stage: Stage, error: String },
    /// The link was found down while the ledger said it was up.
    LinkLost,
    /// One attempt of a retried operation failed.
    AttemptFailed {
        operation: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    /// The controller took a command off the queue.
    CommandReceived { command: String },
    /// An activity started.
    ActivityStarted { name: String },
    /// An activity stopped.
    ActivityStopped { name: String },
}

/// Sender for lifecycle events.
pub type EventSender = broadcast::Sender<LifecycleEvent>;

/// Receiver for lifecycle events.
pub type EventReceiver = broadcast::Receiver<LifecycleEvent>;

/// Default broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Fan-out of lifecycle events to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events sent from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: LifecycleEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = LifecycleEvent::StageAcquired {
            stage: Stage::SessionCreated,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"stage_acquired\""));
        assert!(json.contains("session_created"));

        let back: LifecycleEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_dispatcher() {
        let dispatcher = EventDispatcher::default();
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 1);

        dispatcher.send(LifecycleEvent::LinkLost);
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::LinkLost);
    }

    #[test]
    fn test_send_without_receivers() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.send(LifecycleEvent::ActivityStarted {
            name: "sampler".into(),
        });
        assert_eq!(dispatcher.receiver_count(), 0);
    }
}
