//! Frame acquisition: bounded sensor read, calibration, plausibility check.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::trace;

use crate::calibration::SharedProfile;
use crate::config::SensorConfig;
use crate::data::ThermalFrame;
use crate::error::{AppResult, InspectError};
use crate::hardware::ThermalSensor;

/// Produces calibrated frames from a [`ThermalSensor`].
///
/// Acquisition always applies the current profile, whatever its status, so
/// that an uncalibrated sensor can still be inspected for diagnostics. Gating
/// scans on a valid profile is the supervisor's job.
pub struct FrameAcquisition {
    sensor: Arc<dyn ThermalSensor>,
    profile: SharedProfile,
    timeout: Duration,
    plausible: (f64, f64),
}

impl FrameAcquisition {
    /// Acquisition over `sensor` using the shared `profile`.
    pub fn new(sensor: Arc<dyn ThermalSensor>, profile: SharedProfile, config: &SensorConfig) -> Self {
        Self {
            sensor,
            profile,
            timeout: config.capture_timeout(),
            plausible: (config.min_plausible_c, config.max_plausible_c),
        }
    }

    /// Sensor geometry.
    pub fn dimensions(&self) -> (usize, usize) {
        self.sensor.dimensions()
    }

    /// Capture one corrected frame.
    ///
    /// # Errors
    ///
    /// `SensorTimeout` if the read does not complete in time, `SensorComm`
    /// for driver errors, a wrong sample count, or a corrected value outside
    /// the plausible range.
    pub async fn capture(&self) -> AppResult<ThermalFrame> {
        let (width, height) = self.sensor.dimensions();
        let raw = timeout(self.timeout, self.sensor.read_raw_grid())
            .await
            .map_err(|_| InspectError::SensorTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        let (gain, offset) = {
            let profile = self.profile.read();
            (profile.gain, profile.offset)
        };

        let (low, high) = self.plausible;
        let mut corrected = Vec::with_capacity(raw.len());
        for (i, value) in raw.into_iter().enumerate() {
            let celsius = value * gain + offset;
            if !celsius.is_finite() || celsius < low || celsius > high {
                return Err(InspectError::SensorComm(format!(
                    "implausible reading {celsius:.2} °C at pixel {i} (allowed {low}..{high})"
                )));
            }
            corrected.push(celsius);
        }

        let frame = ThermalFrame::from_samples(width, height, corrected)?;
        trace!(mean = frame.stats().mean, max = frame.stats().max, "Frame captured");
        Ok(frame)
    }
}
