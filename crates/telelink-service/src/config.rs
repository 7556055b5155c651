//! Service configuration.
//!
//! Read from `device.toml` in the platform config directory
//! (`~/.config/telelink/device.toml` on Linux) unless `--config` is given.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use telelink_core::ControllerConfig;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connectivity lifecycle settings.
    pub lifecycle: ControllerConfig,
    /// Temperature source.
    pub sensor: SensorConfig,
    /// Accepted setpoint range.
    pub setpoint: SetpointConfig,
    /// What to do when a lifecycle ends.
    pub restart: RestartConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the whole configuration, reporting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let lifecycle = &self.lifecycle;
        let sections = [
            lifecycle.link.validate(),
            lifecycle.session.validate(),
            lifecycle.activities.validate(),
            lifecycle.queue.validate(),
        ];
        for message in sections.into_iter().flatten() {
            let (field, message) = match message.split_once(' ') {
                Some((field, rest)) => {
                    (format!("lifecycle.{}", field.trim_end_matches(':')), rest)
                }
                None => ("lifecycle".to_string(), message.as_str()),
            };
            errors.push(ValidationError {
                field,
                message: message.to_string(),
            });
        }

        errors.extend(self.sensor.validate());
        errors.extend(self.setpoint.validate());

        let subscribed = self
            .lifecycle
            .session
            .subscriptions
            .iter()
            .any(|topic| topic == &self.setpoint.topic);
        if !subscribed {
            errors.push(ValidationError {
                field: "setpoint.topic".to_string(),
                message: format!(
                    "'{}' is not in lifecycle.session.subscriptions",
                    self.setpoint.topic
                ),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Where temperature readings come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorConfig {
    /// Random walk around a base temperature.
    Simulated {
        /// Centre of the walk, °C.
        base_celsius: f32,
        /// Largest step per sample, °C.
        step_celsius: f32,
    },
    /// Linux thermal zone file reporting millidegrees Celsius.
    ThermalZone {
        /// Path such as `/sys/class/thermal/thermal_zone0/temp`.
        path: PathBuf,
    },
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig::Simulated {
            base_celsius: 21.0,
            step_celsius: 0.2,
        }
    }
}

impl SensorConfig {
    /// Validate and return any errors.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        match self {
            SensorConfig::Simulated {
                base_celsius,
                step_celsius,
            } => {
                if !base_celsius.is_finite() || !(-40.0..=85.0).contains(base_celsius) {
                    errors.push(ValidationError {
                        field: "sensor.base_celsius".to_string(),
                        message: format!("{} is outside -40..=85", base_celsius),
                    });
                }
                if !step_celsius.is_finite() || *step_celsius < 0.0 {
                    errors.push(ValidationError {
                        field: "sensor.step_celsius".to_string(),
                        message: "must be a non-negative number".to_string(),
                    });
                }
            }
            SensorConfig::ThermalZone { path } => {
                if path.as_os_str().is_empty() {
                    errors.push(ValidationError {
                        field: "sensor.path".to_string(),
                        message: "thermal zone path cannot be empty".to_string(),
                    });
                }
            }
        }
        errors
    }
}

/// Setpoint handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetpointConfig {
    /// Topic setpoint updates arrive on.
    pub topic: String,
    /// Lowest accepted setpoint, °F.
    pub min: i32,
    /// Highest accepted setpoint, °F.
    pub max: i32,
}

impl Default for SetpointConfig {
    fn default() -> Self {
        Self {
            topic: "thermostat/setpoint".to_string(),
            min: 50,
            max: 90,
        }
    }
}

impl SetpointConfig {
    /// Validate and return any errors.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.topic.is_empty() {
            errors.push(ValidationError {
                field: "setpoint.topic".to_string(),
                message: "topic cannot be empty".to_string(),
            });
        }
        if self.min > self.max {
            errors.push(ValidationError {
                field: "setpoint.min".to_string(),
                message: format!("min {} is greater than max {}", self.min, self.max),
            });
        }
        errors
    }
}

/// Restart behaviour after a lifecycle ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Start a new lifecycle after one ends.
    pub enabled: bool,
    /// Pause before restarting.
    #[serde(rename = "delay_ms", with = "millis")]
    pub delay: Duration,
    /// Give up after this many restarts; unlimited if unset.
    pub max_restarts: Option<u32>,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_secs(5),
            max_restarts: None,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `setpoint.min` or `lifecycle.session.broker.port`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("telelink")
        .join("device.toml")
}
