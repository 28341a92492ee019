//! Custom error types for the inspection engine.
//!
//! This module defines the primary error type, `InspectError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can occur while calibrating, scanning and analyzing.
//!
//! ## Error Hierarchy
//!
//! `InspectError` consolidates the following sources:
//!
//! - **`SensorTimeout`** / **`SensorComm`**: Transient thermal sensor failures. Inside a
//!   scan these are retried once and then the affected point is skipped.
//! - **`OutOfRange`**: The motion driver refused a target. Fatal for the running job.
//! - **`Motion`**: Any other motion driver failure. Also job-fatal.
//! - **`EquilibriumTimeout`**: The reference source never settled during calibration.
//!   The previous profile is kept but flagged stale; the controller stays operational.
//! - **`CapacityExceeded`**: The defect list saturated. Never returned from an
//!   analysis; it is only used to surface the truncation as a warning.
//! - **`EmergencyStop`**: Highest-priority abort. Never retried automatically.
//! - **`Rejected`**: A supervisor request was refused, see [`RejectReason`].
//! - **`Config`** / **`Configuration`**: File/env loading errors and semantic
//!   validation errors respectively.

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::supervisor::SystemState;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, InspectError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum InspectError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sensor did not deliver a frame within {timeout_ms} ms")]
    SensorTimeout { timeout_ms: u64 },

    #[error("Sensor communication error: {0}")]
    SensorComm(String),

    #[error("Target ({x:.2}, {y:.2}) mm is out of range for the positioning mechanism")]
    OutOfRange { x: f64, y: f64 },

    #[error("Motion error: {0}")]
    Motion(String),

    #[error(
        "Reference did not reach equilibrium at {target:.2} °C within {waited_ms} ms (last reading {last_reading:.2} °C)"
    )]
    EquilibriumTimeout {
        target: f64,
        last_reading: f64,
        waited_ms: u64,
    },

    #[error("Defect list capacity {capacity} exceeded, {dropped} detections dropped")]
    CapacityExceeded { capacity: usize, dropped: usize },

    #[error("Emergency stop asserted")]
    EmergencyStop,

    #[error("Request rejected: {0}")]
    Rejected(RejectReason),

    #[error("Invalid state transition from {from} on '{event}'")]
    InvalidTransition {
        from: SystemState,
        event: &'static str,
    },

    #[error("Physical interlock is still asserted")]
    InterlockAsserted,
}

impl InspectError {
    /// True for sensor failures that are worth retrying at the same scan point.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InspectError::SensorTimeout { .. } | InspectError::SensorComm(_)
        )
    }

    /// True for failures that terminate the running scan job.
    pub fn is_job_fatal(&self) -> bool {
        matches!(
            self,
            InspectError::OutOfRange { .. } | InspectError::Motion(_) | InspectError::EmergencyStop
        )
    }
}

/// Why the supervisor refused a scan or calibration request.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The controller is not idle.
    Busy(SystemState),
    /// No successful calibration has been recorded.
    CalibrationInvalid,
    /// The last calibration timed out or is older than the configured maximum age.
    CalibrationStale,
    /// The emergency latch is set; `reset_emergency` is required first.
    EmergencyLatched,
    /// The job or calibration arguments failed validation.
    InvalidRequest(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Busy(state) => write!(f, "controller busy ({state})"),
            RejectReason::CalibrationInvalid => write!(f, "no valid calibration"),
            RejectReason::CalibrationStale => write!(f, "calibration is stale"),
            RejectReason::EmergencyLatched => write!(f, "emergency stop latched"),
            RejectReason::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InspectError::SensorComm("checksum mismatch".to_string());
        assert_eq!(
            err.to_string(),
            "Sensor communication error: checksum mismatch"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(InspectError::SensorTimeout { timeout_ms: 500 }.is_transient());
        assert!(InspectError::SensorComm("nack".into()).is_transient());
        assert!(!InspectError::OutOfRange { x: 1.0, y: 2.0 }.is_transient());
        assert!(!InspectError::EmergencyStop.is_transient());
    }

    #[test]
    fn test_job_fatal_classification() {
        assert!(InspectError::OutOfRange { x: 0.0, y: 0.0 }.is_job_fatal());
        assert!(InspectError::EmergencyStop.is_job_fatal());
        assert!(!InspectError::SensorTimeout { timeout_ms: 10 }.is_job_fatal());
    }

    #[test]
    fn test_rejection_message() {
        let err = InspectError::Rejected(RejectReason::Busy(SystemState::Scanning));
        assert!(err.to_string().contains("busy"));
        assert!(err.to_string().contains("Scanning"));
    }
}
