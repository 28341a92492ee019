//! Configuration System using Figment
//!
//! Configuration is layered, highest precedence last:
//! 1. Built-in defaults (`InspectConfig::default()`)
//! 2. A TOML file (optional)
//! 3. Environment variables prefixed with `THERMAL_INSPECT_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore so that field names may
//! keep their own underscores:
//!
//! ```text
//! THERMAL_INSPECT_APPLICATION__LOG_LEVEL=debug
//! THERMAL_INSPECT_DETECTION__DELTA_THRESHOLD=3.5
//! THERMAL_INSPECT_MOTION__SETTLE_MS=300
//! ```
//!
//! # Example
//!
//! ```no_run
//! use thermal_inspect::config::InspectConfig;
//!
//! let config = InspectConfig::load_from("config/inspect.toml")?;
//! println!("Sensor: {}x{}", config.sensor.width, config.sensor.height);
//! # Ok::<(), thermal_inspect::config::ConfigError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::CalibrationSettings;
use crate::detection::DetectionConfig;
use crate::error_recovery::RetryPolicy;
use crate::scan::MotionEnvelope;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "THERMAL_INSPECT_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The figment providers failed to produce a configuration.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// The configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Thermal sensor and acquisition settings
    pub sensor: SensorConfig,
    /// Positioning mechanism settings
    pub motion: MotionConfig,
    /// Anomaly detection thresholds
    pub detection: DetectionConfig,
    /// Calibration procedure settings
    pub calibration: CalibrationSettings,
    /// Telemetry channel settings
    pub telemetry: TelemetryConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "thermal-inspect".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Thermal sensor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Frame width in pixels
    pub width: usize,
    /// Frame height in pixels
    pub height: usize,
    /// Upper bound on a single raw grid read
    pub capture_timeout_ms: u64,
    /// Attempts per scan point, including the first
    pub retry_attempts: u32,
    /// Delay between capture attempts
    pub retry_backoff_ms: u64,
    /// Lowest corrected temperature accepted as plausible (°C)
    pub min_plausible_c: f64,
    /// Highest corrected temperature accepted as plausible (°C)
    pub max_plausible_c: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            width: 32,
            height: 24,
            capture_timeout_ms: 500,
            retry_attempts: 2,
            retry_backoff_ms: 50,
            min_plausible_c: -40.0,
            max_plausible_c: 300.0,
        }
    }
}

impl SensorConfig {
    /// Capture timeout as a `Duration`.
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Retry policy for transient capture failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            backoff_delay: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Positioning mechanism configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Physical envelope the executor clamps targets into
    pub envelope: MotionEnvelope,
    /// Fixed settle time after each move
    pub settle_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            envelope: MotionEnvelope::default(),
            settle_ms: 200,
        }
    }
}

impl MotionConfig {
    /// Settle time as a `Duration`.
    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Bounded channel capacity; events beyond it are dropped
    pub channel_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl InspectConfig {
    /// Load configuration from defaults and environment variables only.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::base_figment())
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or validation fails.
    /// A missing file is not an error; defaults are used instead.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    /// Parse configuration from a TOML string layered over defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml));
        Self::extract(figment)
    }

    /// Render this configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Sensor frame is large enough for the 5×5 pattern detector
    /// - Plausible temperature range is ordered
    /// - Motion envelope is non-empty
    /// - Detection thresholds are positive and capacity is non-zero
    /// - Calibration timings are consistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.sensor.width < 5 || self.sensor.height < 5 {
            return Err(ConfigError::ValidationError(format!(
                "Sensor frame {}x{} is too small; at least 5x5 is required",
                self.sensor.width, self.sensor.height
            )));
        }
        if self.sensor.capture_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "sensor.capture_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sensor.min_plausible_c >= self.sensor.max_plausible_c {
            return Err(ConfigError::ValidationError(format!(
                "Plausible range [{}, {}] is empty",
                self.sensor.min_plausible_c, self.sensor.max_plausible_c
            )));
        }

        if !self.motion.envelope.is_valid() {
            return Err(ConfigError::ValidationError(format!(
                "Motion envelope {:?} is empty or not finite",
                self.motion.envelope
            )));
        }

        self.detection
            .validate()
            .map_err(ConfigError::ValidationError)?;
        self.calibration
            .validate()
            .map_err(ConfigError::ValidationError)?;

        if self.telemetry.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "telemetry.channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = InspectConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sensor.width, 32);
        assert_eq!(config.sensor.height, 24);
        assert_eq!(config.detection.capacity, 100);
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let config = InspectConfig::from_toml_str(
            r#"
            [application]
            log_level = "debug"

            [detection]
            delta_threshold = 4.0

            [motion]
            settle_ms = 350
            "#,
        )
        .unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.detection.delta_threshold, 4.0);
        assert_eq!(config.motion.settle_time(), Duration::from_millis(350));
        // untouched sections keep their defaults
        assert_eq!(config.sensor, SensorConfig::default());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = InspectConfig::from_toml_str("[application]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn test_tiny_sensor_rejected() {
        let err = InspectConfig::from_toml_str("[sensor]\nwidth = 4\n").unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err =
            InspectConfig::from_toml_str("[detection]\ngradient_threshold = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sensor]\nwidth = 16\nheight = 12\n").unwrap();
        let config = InspectConfig::load_from(file.path()).unwrap();
        assert_eq!(config.sensor.width, 16);
        assert_eq!(config.sensor.height, 12);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = InspectConfig::default();
        let rendered = config.to_toml_string().unwrap();
        let parsed = InspectConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
