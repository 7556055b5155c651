use std::sync::Arc;
use std::time::Duration;

use telelink_types::{Mode, fahrenheit_from_celsius};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::signal::ChangeSet;
use crate::state::SharedState;
use crate::traits::SensorSource;

/// What one sample changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleOutcome {
    /// Temperature stored, °F.
    pub temperature: i32,
    /// Mode stored.
    pub mode: Mode,
    /// Temperature differed from the previous value.
    pub temperature_changed: bool,
    /// Mode differed from the previous value.
    pub mode_changed: bool,
    /// The publisher was notified.
    pub published: bool,
}

/// Periodically samples the sensor and updates temperature and mode.
///
/// Sole writer of `temperature` and `mode`.
pub struct Sampler {
    sensor: Arc<dyn SensorSource>,
    state: Arc<SharedState>,
    period: Duration,
}

impl Sampler {
    /// Create a sampler.
    pub fn new(sensor: Arc<dyn SensorSource>, state: Arc<SharedState>, period: Duration) -> Self {
        Self {
            sensor,
            state,
            period,
        }
    }

    /// Sample every period until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.sample_once().await {
                warn!("Temperature sample failed: {}", e);
            }
        }
    }

    /// Take one sample and propagate any change.
    ///
    /// A change raises the display signal and, while the session is up,
    /// notifies the publisher.
    pub async fn sample_once(&self) -> Result<SampleOutcome> {
        let celsius = self.sensor.read_celsius().await?;
        let temperature = fahrenheit_from_celsius(celsius)?;

        let temperature_changed = self.state.temperature.set(temperature).await;
        if temperature_changed {
            debug!("Temperature now {}°F", temperature);
        }

        let setpoint = self.state.setpoint.get().await;
        let mode = Mode::select(temperature, setpoint);
        let mode_changed = self.state.mode.set(mode).await;
        if mode_changed {
            debug!("Mode now {}", mode);
        }

        let changes = ChangeSet {
            temperature: temperature_changed,
            mode: mode_changed,
        };

        let mut published = false;
        if !changes.is_empty() {
            self.state.display.raise();
            published = self.notify_publisher(changes).await;
        }

        Ok(SampleOutcome {
            temperature,
            mode,
            temperature_changed,
            mode_changed,
            published,
        })
    }

    /// Post to the publisher only while connected.
    ///
    /// The connectivity read guard is held across the post, so the controller
    /// cannot clear connectivity between the check and the post.
    async fn notify_publisher(&self, changes: ChangeSet) -> bool {
        let connected = self.state.connected.read().await;
        if *connected {
            self.state.publisher.post(changes);
        }
        *connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSensor;

    fn sampler(sensor: MockSensor, state: &Arc<SharedState>) -> Sampler {
        Sampler::new(Arc::new(sensor), Arc::clone(state), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_offline_sample_updates_display_only() {
        let state = Arc::new(SharedState::new(68, 65));
        let outcome = sampler(MockSensor::new(21.1), &state).sample_once().await.unwrap();

        assert_eq!(outcome.temperature, 70);
        assert!(outcome.temperature_changed);
        assert!(!outcome.published);
        assert_eq!(state.display.raised_count(), 1);
        assert!(state.publisher.try_take().is_none());
    }

    #[tokio::test]
    async fn test_connected_sample_notifies_publisher() {
        let state = Arc::new(SharedState::new(68, 65));
        state.connected.set(true).await;
        let outcome = sampler(MockSensor::new(21.1), &state).sample_once().await.unwrap();

        assert!(outcome.published);
        assert_eq!(state.publisher.try_take(), Some(ChangeSet::TEMPERATURE));
    }

    #[tokio::test]
    async fn test_unchanged_sample_is_silent() {
        let state = Arc::new(SharedState::new(68, 65));
        state.connected.set(true).await;
        let outcome = sampler(MockSensor::new(20.0), &state).sample_once().await.unwrap();

        assert!(!outcome.temperature_changed);
        assert!(!outcome.mode_changed);
        assert_eq!(state.display.raised_count(), 0);
        assert_eq!(state.publisher.posted_count(), 0);
    }

    #[tokio::test]
    async fn test_mode_follows_setpoint() {
        let state = Arc::new(SharedState::new(68, 65));
        state.connected.set(true).await;
        let sampler = sampler(MockSensor::new(20.0), &state);
        assert_eq!(state.mode.get().await, Mode::Cool);

        state.setpoint.set(72).await;
        let outcome = sampler.sample_once().await.unwrap();
        assert_eq!(outcome.mode, Mode::Heat);
        assert!(outcome.mode_changed);
        assert_eq!(state.publisher.try_take(), Some(ChangeSet::MODE));

        state.setpoint.set(68).await;
        assert_eq!(sampler.sample_once().await.unwrap().mode, Mode::Idle);
    }

    #[tokio::test]
    async fn test_sensor_failure_leaves_state_alone() {
        let state = Arc::new(SharedState::new(68, 65));
        let sensor = MockSensor::new(30.0);
        sensor.set_should_fail(true);
        assert!(sampler(sensor, &state).sample_once().await.is_err());
        assert_eq!(state.temperature.get().await, 68);
        assert_eq!(state.temperature.version(), 0);
    }
}
