//! Device state shared between the controller and its activities.

use std::fmt;

use serde::{Deserialize, Serialize};
use telelink_types::Mode;

use crate::shared::SharedValue;
use crate::signal::{ChangeSet, ChangeSignal, NotifySlot};

/// Connectivity as seen by the lifecycle controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    /// Nothing is up.
    #[default]
    Disconnected,
    /// The transport link is up, the session is not.
    LinkUp,
    /// The session is connected; publishing is allowed.
    SessionUp,
    /// The session was lost and teardown is in progress.
    Degraded,
}

impl ConnectivityState {
    /// Whether a transition from `self` to `next` is part of the lifecycle.
    pub fn can_transition_to(self, next: ConnectivityState) -> bool {
        use ConnectivityState::*;
        matches!(
            (self, next),
            (Disconnected, LinkUp)
                | (LinkUp, SessionUp)
                | (LinkUp, Disconnected)
                | (SessionUp, Degraded)
                | (Degraded, Disconnected)
        )
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::LinkUp => "link-up",
            ConnectivityState::SessionUp => "session-up",
            ConnectivityState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// One snapshot of what the display shows.
///
/// Fields are read one at a time, so a frame may mix values from
/// neighbouring updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFrame {
    /// Measured temperature in °F.
    pub temperature: i32,
    /// Target temperature in °F.
    pub setpoint: i32,
    /// Current mode.
    pub mode: Mode,
    /// Whether the session is up.
    pub connected: bool,
}

/// Values and wake-up primitives shared by all activities.
///
/// Writers:
/// - `temperature`, `mode`: the sampler
/// - `setpoint`: the subscription handler
/// - `connected`: the lifecycle controller
#[derive(Debug)]
pub struct SharedState {
    /// Measured temperature in °F.
    pub temperature: SharedValue<i32>,
    /// Target temperature in °F.
    pub setpoint: SharedValue<i32>,
    /// Derived mode.
    pub mode: SharedValue<Mode>,
    /// Session connectivity, read by producers before notifying the publisher.
    pub connected: SharedValue<bool>,
    /// Wakes the display refresher.
    pub display: ChangeSignal,
    /// Wakes the publisher with what changed.
    pub publisher: NotifySlot<ChangeSet>,
}

impl SharedState {
    /// Create state with initial temperature and setpoint; the mode is derived.
    pub fn new(temperature: i32, setpoint: i32) -> Self {
        Self {
            temperature: SharedValue::new("temperature", temperature),
            setpoint: SharedValue::new("setpoint", setpoint),
            mode: SharedValue::new("mode", Mode::select(temperature, setpoint)),
            connected: SharedValue::new("connected", false),
            display: ChangeSignal::new(),
            publisher: NotifySlot::new(),
        }
    }

    /// Whether the session is up.
    pub async fn is_connected(&self) -> bool {
        self.connected.get().await
    }

    /// Build a display frame, taking each value's guard on its own.
    pub async fn frame(&self) -> DisplayFrame {
        let temperature = self.temperature.get().await;
        let setpoint = self.setpoint.get().await;
        let mode = self.mode.get().await;
        let connected = self.connected.get().await;
        DisplayFrame {
            temperature,
            setpoint,
            mode,
            connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use ConnectivityState::*;
        assert!(Disconnected.can_transition_to(LinkUp));
        assert!(LinkUp.can_transition_to(SessionUp));
        assert!(SessionUp.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(SessionUp));
        assert!(!SessionUp.can_transition_to(LinkUp));
    }

    #[tokio::test]
    async fn test_initial_state() {
        let state = SharedState::new(68, 72);
        let frame = state.frame().await;
        assert_eq!(frame.temperature, 68);
        assert_eq!(frame.setpoint, 72);
        assert_eq!(frame.mode, Mode::Heat);
        assert!(!frame.connected);
        assert!(!state.is_connected().await);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectivityState::SessionUp.to_string(), "session-up");
        let json = serde_json::to_string(&ConnectivityState::LinkUp).unwrap();
        assert_eq!(json, "\"link_up\"");
    }
}
