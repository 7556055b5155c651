//! Lifecycle controller configuration.
//!
//! Everything deserializes with `#[serde(default)]`, so a config file only
//! needs to name what differs from the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::commands::DEFAULT_QUEUE_CAPACITY;
use crate::error::{Error, Result};
use crate::link::{Credentials, LinkConfig, LinkInterface};
use crate::retry::RetryPolicy;
use crate::session::{BrokerInfo, Qos, SecurityInfo};
use crate::util::validate_identifier_prefix;

/// Where inbound messages are handed to the subscription handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundRouting {
    /// Call the handler directly from the session callback.
    #[default]
    Inline,
    /// Enqueue a command and call the handler from the controller.
    Deferred,
}

/// Top-level controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Transport link settings.
    pub link: LinkOptions,
    /// Messaging session settings.
    pub session: SessionOptions,
    /// Activity settings.
    pub activities: ActivityOptions,
    /// Command queue settings.
    pub queue: QueueOptions,
}

impl ControllerConfig {
    /// Check every section, reporting all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        problems.extend(self.link.validate());
        problems.extend(self.session.validate());
        problems.extend(self.activities.validate());
        problems.extend(self.queue.validate());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_config(problems.join("; ")))
        }
    }
}

/// Transport link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkOptions {
    /// Link manager settings.
    #[serde(flatten)]
    pub config: LinkConfig,
    /// Network credentials.
    pub credentials: Credentials,
    /// Connect retry policy.
    pub retry: RetryPolicy,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            config: LinkConfig::default(),
            credentials: Credentials::default(),
            retry: RetryPolicy::for_link(),
        }
    }
}

impl LinkOptions {
    /// Validate, returning one message per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.config.interface == LinkInterface::Station {
            if self.credentials.ssid.is_empty() {
                problems.push("link.credentials.ssid cannot be empty".to_string());
            } else if self.credentials.ssid.len() > 32 {
                problems.push("link.credentials.ssid must be at most 32 bytes".to_string());
            }
            if self.credentials.security.requires_password()
                && self.credentials.password.is_empty()
            {
                problems.push(format!(
                    "link.credentials.password is required for {:?}",
                    self.credentials.security
                ));
            }
        }
        if let Err(e) = self.retry.validate() {
            problems.push(format!("link.retry: {}", e));
        }
        problems
    }
}

/// Messaging session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Broker endpoint.
    pub broker: BrokerInfo,
    /// Authentication material.
    pub security: SecurityInfo,
    /// Prefix of the generated client identifier.
    pub identifier_prefix: String,
    /// Longest identifier the broker accepts.
    pub identifier_max_len: usize,
    /// Send/receive buffer size in bytes.
    pub buffer_size: usize,
    /// Prefix for published topics, e.g. `thermostat` gives `thermostat/temperature`.
    pub topic_prefix: String,
    /// Topic filters subscribed after the session comes up.
    pub subscriptions: Vec<String>,
    /// QoS for publishes and subscriptions.
    pub qos: Qos,
    /// Connect retry policy.
    pub retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            broker: BrokerInfo::default(),
            security: SecurityInfo::default(),
            identifier_prefix: "telelink-".to_string(),
            identifier_max_len: 64,
            buffer_size: 4096,
            topic_prefix: "thermostat".to_string(),
            subscriptions: vec!["thermostat/setpoint".to_string()],
            qos: Qos::AtLeastOnce,
            retry: RetryPolicy::for_session(),
        }
    }
}

impl SessionOptions {
    /// Topic the temperature is published on.
    pub fn temperature_topic(&self) -> String {
        format!("{}/temperature", self.topic_prefix)
    }

    /// Topic the mode is published on.
    pub fn mode_topic(&self) -> String {
        format!("{}/mode", self.topic_prefix)
    }

    /// Validate, returning one message per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.broker.host.is_empty() {
            problems.push("session.broker.host cannot be empty".to_string());
        }
        if self.broker.port == 0 {
            problems.push("session.broker.port cannot be 0".to_string());
        }
        if let Err(e) = validate_identifier_prefix(&self.identifier_prefix) {
            problems.push(format!("session.identifier_prefix: {}", e));
        }
        // Room for at least a 13-digit millisecond suffix.
        if self.identifier_max_len < self.identifier_prefix.len() + 13 {
            problems.push(format!(
                "session.identifier_max_len {} leaves no room for a suffix after '{}'",
                self.identifier_max_len, self.identifier_prefix
            ));
        }
        if self.buffer_size == 0 {
            problems.push("session.buffer_size must be greater than 0".to_string());
        }
        if self.topic_prefix.is_empty() || self.topic_prefix.contains(['+', '#']) {
            problems.push(format!(
                "session.topic_prefix '{}' must be non-empty and free of wildcards",
                self.topic_prefix
            ));
        }
        for (i, topic) in self.subscriptions.iter().enumerate() {
            if topic.is_empty() {
                problems.push(format!("session.subscriptions[{}] cannot be empty", i));
            }
        }
        if let Err(e) = self.retry.validate() {
            problems.push(format!("session.retry: {}", e));
        }
        problems
    }
}

/// Producer and consumer activity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityOptions {
    /// Time between sensor samples.
    #[serde(rename = "sample_period_ms", with = "crate::util::serde_millis")]
    pub sample_period: Duration,
    /// Temperature assumed before the first sample, °F.
    pub initial_temperature: i32,
    /// Setpoint until one arrives, °F.
    pub initial_setpoint: i32,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_secs(1),
            initial_temperature: 68,
            initial_setpoint: 70,
        }
    }
}

impl ActivityOptions {
    /// Validate, returning one message per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.sample_period.is_zero() {
            problems.push("activities.sample_period_ms must be greater than 0".to_string());
        }
        problems
    }
}

/// Command queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Queue depth.
    pub capacity: usize,
    /// Warn this often while a producer waits on a full queue.
    #[serde(rename = "warn_after_ms", with = "crate::util::serde_millis")]
    pub warn_after: Duration,
    /// Where inbound messages are handled.
    pub inbound_routing: InboundRouting,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            warn_after: Duration::from_secs(5),
            inbound_routing: InboundRouting::Inline,
        }
    }
}

impl QueueOptions {
    /// Validate, returning one message per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.capacity == 0 {
            problems.push("queue.capacity must be greater than 0".to_string());
        }
        if self.warn_after.is_zero() {
            problems.push("queue.warn_after_ms must be greater than 0".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.link.credentials = Credentials::new("lab", "password");
        config
    }

    #[test]
    fn test_default_needs_credentials() {
        let err = ControllerConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("ssid"));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_ethernet_skips_credentials() {
        let mut config = ControllerConfig::default();
        config.link.config.interface = LinkInterface::Ethernet;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collects_all_problems() {
        let mut config = valid();
        config.session.broker.port = 0;
        config.session.buffer_size = 0;
        config.queue.capacity = 0;
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("broker.port"));
        assert!(message.contains("buffer_size"));
        assert!(message.contains("queue.capacity"));
    }

    #[test]
    fn test_identifier_room() {
        let mut config = valid();
        config.session.identifier_max_len = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_topic_prefix_rejected() {
        let mut config = valid();
        config.session.topic_prefix = "home/#".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_topics() {
        let session = SessionOptions::default();
        assert_eq!(session.temperature_topic(), "thermostat/temperature");
        assert_eq!(session.mode_topic(), "thermostat/mode");
    }

    #[test]
    fn test_partial_deserialize() {
        let json = r#"{
            "link": { "interface": "station", "credentials": { "ssid": "lab", "password": "pw" } },
            "session": { "broker": { "host": "broker.local" }, "retry": { "max_attempts": 7 } },
            "queue": { "inbound_routing": "deferred", "warn_after_ms": 250 }
        }"#;
        let config: ControllerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.session.broker.host, "broker.local");
        assert_eq!(config.session.broker.port, 1883);
        assert_eq!(config.session.retry.max_attempts, 7);
        assert_eq!(config.queue.inbound_routing, InboundRouting::Deferred);
        assert_eq!(config.queue.warn_after, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }
}
