//! Temperature sources for the host service.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use telelink_core::{Error, Result, SensorSource};

use crate::config::SensorConfig;

/// Build the sensor described by the configuration.
pub fn from_config(config: &SensorConfig) -> Arc<dyn SensorSource> {
    match config {
        SensorConfig::Simulated {
            base_celsius,
            step_celsius,
        } => Arc::new(SimulatedSensor::new(*base_celsius, *step_celsius)),
        SensorConfig::ThermalZone { path } => Arc::new(ThermalZoneSensor::new(path.clone())),
    }
}

/// Random walk around a base temperature.
///
/// Each sample moves by at most `step` and is pulled back toward the base by
/// a quarter of the current offset.
#[derive(Debug)]
pub struct SimulatedSensor {
    base: f32,
    step: f32,
    current: Mutex<f32>,
}

impl SimulatedSensor {
    /// Walk around `base` °C in steps of at most `step` °C.
    pub fn new(base: f32, step: f32) -> Self {
        Self {
            base,
            step: step.abs(),
            current: Mutex::new(base),
        }
    }

    fn next(&self, jitter: f32) -> Result<f32> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::Sensor("simulated sensor state poisoned".to_string()))?;
        let pull = (self.base - *current) * 0.25;
        *current += pull + jitter * self.step;
        Ok(*current)
    }
}

#[async_trait]
impl SensorSource for SimulatedSensor {
    async fn read_celsius(&self) -> Result<f32> {
        let jitter = if self.step > 0.0 {
            rand::rng().random_range(-1.0f32..=1.0)
        } else {
            0.0
        };
        self.next(jitter)
    }
}

/// Linux thermal zone (`/sys/class/thermal/thermal_zone*/temp`), reported in
/// millidegrees Celsius.
#[derive(Debug, Clone)]
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    /// Read from `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SensorSource for ThermalZoneSensor {
    async fn read_celsius(&self) -> Result<f32> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Sensor(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let millidegrees: i64 = raw.trim().parse().map_err(|_| {
            Error::Sensor(format!(
                "unexpected thermal zone value '{}' in {}",
                raw.trim(),
                self.path.display()
            ))
        })?;
        let celsius = millidegrees as f32 / 1000.0;
        debug!("Thermal zone {} reads {:.1}°C", self.path.display(), celsius);
        Ok(celsius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_simulated_stays_put_without_step() {
        let sensor = SimulatedSensor::new(21.0, 0.0);
        for _ in 0..5 {
            assert_eq!(sensor.read_celsius().await.unwrap(), 21.0);
        }
    }

    #[test]
    fn test_simulated_is_pulled_toward_base() {
        let sensor = SimulatedSensor::new(20.0, 1.0);
        // Push it up, then let it settle.
        for _ in 0..4 {
            sensor.next(1.0).unwrap();
        }
        let high = sensor.next(0.0).unwrap();
        let settled = (0..20).map(|_| sensor.next(0.0).unwrap()).last().unwrap();
        assert!(high > 21.0);
        assert!((settled - 20.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_simulated_step_is_bounded() {
        let sensor = SimulatedSensor::new(21.0, 0.5);
        let mut previous = 21.0f32;
        for _ in 0..100 {
            let value = sensor.read_celsius().await.unwrap();
            let pull = (21.0 - previous) * 0.25;
            assert!((value - previous - pull).abs() <= 0.5 + f32::EPSILON);
            previous = value;
        }
    }

    #[tokio::test]
    async fn test_thermal_zone_reads_millidegrees() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "42500").unwrap();
        let sensor = ThermalZoneSensor::new(file.path().to_path_buf());
        assert_eq!(sensor.read_celsius().await.unwrap(), 42.5);
    }

    #[tokio::test]
    async fn test_thermal_zone_errors() {
        let sensor = ThermalZoneSensor::new(PathBuf::from("/nonexistent/thermal/temp"));
        assert!(matches!(sensor.read_celsius().await, Err(Error::Sensor(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "warm").unwrap();
        let sensor = ThermalZoneSensor::new(file.path().to_path_buf());
        let err = sensor.read_celsius().await.unwrap_err();
        assert!(err.to_string().contains("warm"));
    }

    #[tokio::test]
    async fn test_from_config() {
        let sensor = from_config(&SensorConfig::Simulated {
            base_celsius: 18.0,
            step_celsius: 0.0,
        });
        assert_eq!(sensor.read_celsius().await.unwrap(), 18.0);
    }
}
