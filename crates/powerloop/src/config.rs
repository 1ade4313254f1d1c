//! Loading control configuration from TOML.
//!
//! A file may contain any subset of the sections below; missing sections and
//! keys take their defaults.
//!
//! ```toml
//! [power]
//! device_id = 0
//! max_age_ms = 100
//!
//! [limiter]
//! max_increase_per_second = 2.4
//! hard_stop_voltage = 9.0
//!
//! [pid]
//! kp = 0.02
//! continuous = { min = -180.0, max = 180.0 }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::error::ControlError;
use crate::limiter::LimiterConfig;
use crate::pid::PidConfig;
use crate::telemetry::PowerDistributionConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ControlError),
}

/// Every tunable of one controlled actuator.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub power: PowerDistributionConfig,
    pub limiter: LimiterConfig,
    pub pid: PidConfig,
}

impl CoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        self.power.validate()?;
        self.limiter.validate()?;
        self.pid.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::MotorClass;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = CoreConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.power.max_age_ms, 100);
        assert_eq!(config.limiter.hard_stop_voltage, 9.0);
        assert!(config.limiter.hold_without_telemetry);
    }

    #[test]
    fn test_partial_sections() {
        let config = CoreConfig::from_toml_str(
            r#"
            [power]
            device_id = 3

            [limiter]
            max_increase_per_second = 1.2
            amps_per_percent = 25.6
            hold_without_telemetry = false

            [pid]
            kp = 0.5
            setpoint = 90.0
            continuous = { min = -180.0, max = 180.0 }
            output_range = { min = -1.0, max = 1.0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.power.device_id, 3);
        assert_eq!(config.power.max_age_ms, 100);
        assert_eq!(config.limiter.max_increase_per_second, 1.2);
        assert_eq!(config.limiter.max_decrease_per_second, 4.8);
        assert!((config.limiter.amps_per_percent - MotorClass::Bag.amps_per_percent()).abs() < 1e-9);
        assert!(!config.limiter.hold_without_telemetry);
        assert_eq!(
            config.pid,
            PidConfig::new()
                .with_kp(0.5)
                .with_setpoint(90.0)
                .with_continuous_input(-180.0, 180.0)
                .with_output_limits(-1.0, 1.0)
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = CoreConfig::from_toml_str("[limiter]\nanti_brownout_backoff = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CoreConfig::from_toml_str("[pid]\noutput_range = { min = 1.0, max = 1.0 }")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CoreConfig::from_toml_str("[power]\ndevice_id = 300").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = CoreConfig::from_file("/nonexistent/powerloop.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
