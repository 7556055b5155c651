//! Host service running the telelink connectivity lifecycle.
//!
//! This crate supplies concrete collaborators for
//! [`telelink_core::LifecycleController`] on a host with an operating system:
//!
//! - [`HostLink`]: the OS owns the network; connecting confirms a route to the broker
//! - [`MqttSession`]: MQTT over rumqttc, optionally with TLS
//! - [`SimulatedSensor`] and [`ThermalZoneSensor`]: temperature sources
//! - [`LogDisplay`]: renders display frames to the log
//! - [`SetpointHandler`]: accepts setpoint updates from the broker
//!
//! A [`Supervisor`] restarts the lifecycle according to [`RestartConfig`].
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/telelink/device.toml`:
//!
//! ```toml
//! [lifecycle.link.credentials]
//! ssid = "workshop"
//! password = "hunter22"
//!
//! [lifecycle.session.broker]
//! host = "mqtt.local"
//! port = 1883
//!
//! [lifecycle.activities]
//! sample_period_ms = 5000
//!
//! [sensor]
//! kind = "thermal_zone"
//! path = "/sys/class/thermal/thermal_zone0/temp"
//!
//! [setpoint]
//! min = 55
//! max = 85
//!
//! [restart]
//! delay_ms = 10000
//! max_restarts = 20
//! ```

pub mod config;
pub mod display;
pub mod handler;
pub mod link;
pub mod mqtt;
pub mod sensor;
pub mod supervisor;

pub use config::{
    Config, ConfigError, RestartConfig, SensorConfig, SetpointConfig, ValidationError,
    default_config_path,
};
pub use display::LogDisplay;
pub use handler::SetpointHandler;
pub use link::HostLink;
pub use mqtt::MqttSession;
pub use sensor::{SimulatedSensor, ThermalZoneSensor};
pub use supervisor::{Supervisor, SupervisorReport};
