//! Sensor calibration against a reference source.
//!
//! The calibrator drives a [`ReferenceSource`] to a setpoint, waits for it to
//! reach equilibrium under a bounded [`WaitContract`], averages the raw
//! sensor output over the center of the frame and derives the linear
//! correction `corrected = raw * gain + offset`.
//!
//! The profile lives behind an `Arc<parking_lot::RwLock<_>>` shared with the
//! acquisition path. It is written only by a successful calibration (or
//! marked stale by a failed one) and read once per capture.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppResult, InspectError};
use crate::hardware::{ReferenceSource, ThermalSensor};
use crate::safety::{PollOutcome, SafetyInterlock, WaitContract};

/// Calibration procedure settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Equilibrium band around the setpoint (°C)
    pub tolerance_c: f64,
    /// Time the reading must stay inside the band (ms)
    pub dwell_ms: u64,
    /// Upper bound on the equilibrium wait (ms)
    pub timeout_ms: u64,
    /// Delay between reference readings (ms)
    pub poll_interval_ms: u64,
    /// Edge length of the centered square sampled for the measurement (px)
    pub center_region: usize,
    /// Frames averaged per measurement
    pub samples: usize,
    /// Age after which a valid profile is considered stale (s)
    pub max_age_secs: u64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            tolerance_c: 0.5,
            dwell_ms: 2_000,
            timeout_ms: 60_000,
            poll_interval_ms: 250,
            center_region: 4,
            samples: 4,
            max_age_secs: 24 * 60 * 60,
        }
    }
}

impl CalibrationSettings {
    /// Check timing and sampling consistency.
    pub fn validate(&self) -> Result<(), String> {
        if !self.tolerance_c.is_finite() || self.tolerance_c <= 0.0 {
            return Err(format!(
                "calibration.tolerance_c must be positive, got {}",
                self.tolerance_c
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err("calibration.poll_interval_ms must be greater than 0".to_string());
        }
        if self.timeout_ms <= self.dwell_ms {
            return Err(format!(
                "calibration.timeout_ms ({}) must exceed dwell_ms ({})",
                self.timeout_ms, self.dwell_ms
            ));
        }
        if self.center_region == 0 || self.samples == 0 {
            return Err("calibration.center_region and samples must be greater than 0".to_string());
        }
        if self.max_age_secs == 0 {
            return Err("calibration.max_age_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Equilibrium wait bounds.
    pub fn wait_contract(&self) -> WaitContract {
        WaitContract::new(
            Duration::from_millis(self.timeout_ms),
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    /// Dwell requirement as a `Duration`.
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    /// Maximum profile age.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Lifecycle of a [`CalibrationProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    /// Never calibrated; identity correction
    Uncalibrated,
    /// Usable for scans
    Valid,
    /// A later calibration attempt failed, or the profile aged out
    Stale,
}

/// One reference/measurement pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    /// Reference thermometer reading at equilibrium (°C)
    pub reference: f64,
    /// Mean raw sensor value over the center region
    pub measured: f64,
}

/// Linear sensor correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Additive term
    pub offset: f64,
    /// Multiplicative term
    pub gain: f64,
    /// Points the correction was fitted from
    pub reference_points: Vec<ReferencePoint>,
    /// Current status
    pub status: CalibrationStatus,
    /// When the correction was computed
    pub calibrated_at: Option<DateTime<Utc>>,
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self {
            offset: 0.0,
            gain: 1.0,
            reference_points: Vec::new(),
            status: CalibrationStatus::Uncalibrated,
            calibrated_at: None,
        }
    }
}

impl CalibrationProfile {
    /// Apply the correction to one raw sample.
    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.gain + self.offset
    }

    /// Status is `Valid`.
    pub fn is_valid(&self) -> bool {
        self.status == CalibrationStatus::Valid
    }

    /// Time since calibration, if calibrated.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.calibrated_at
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }

    /// Whether the profile is valid and no older than `max_age`.
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.is_valid() && self.age(now).is_some_and(|age| age <= max_age)
    }

    /// Demote a valid profile to `Stale`. Uncalibrated stays uncalibrated.
    pub fn mark_stale(&mut self) {
        if self.status == CalibrationStatus::Valid {
            self.status = CalibrationStatus::Stale;
        }
    }

    /// Offset-only correction from a single point.
    pub fn single_point(point: ReferencePoint) -> Self {
        Self {
            offset: point.reference - point.measured,
            gain: 1.0,
            reference_points: vec![point],
            status: CalibrationStatus::Valid,
            calibrated_at: Some(Utc::now()),
        }
    }

    /// Least-squares gain and offset through `points`.
    ///
    /// # Errors
    ///
    /// `Configuration` with fewer than two points or when every measurement
    /// is identical.
    pub fn fit(points: Vec<ReferencePoint>) -> AppResult<Self> {
        if points.len() < 2 {
            return Err(InspectError::Configuration(
                "Least-squares calibration needs at least two reference points".to_string(),
            ));
        }
        let n = points.len() as f64;
        let mean_m = points.iter().map(|p| p.measured).sum::<f64>() / n;
        let mean_r = points.iter().map(|p| p.reference).sum::<f64>() / n;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for p in &points {
            let dm = p.measured - mean_m;
            sxy += dm * (p.reference - mean_r);
            sxx += dm * dm;
        }
        if sxx <= f64::EPSILON {
            return Err(InspectError::Configuration(
                "Reference measurements are identical; gain is undetermined".to_string(),
            ));
        }
        let gain = sxy / sxx;
        Ok(Self {
            offset: mean_r - gain * mean_m,
            gain,
            reference_points: points,
            status: CalibrationStatus::Valid,
            calibrated_at: Some(Utc::now()),
        })
    }
}

/// Profile shared between the calibrator and acquisition.
pub type SharedProfile = Arc<RwLock<CalibrationProfile>>;

/// Runs calibration procedures and publishes the result into a
/// [`SharedProfile`].
pub struct Calibrator {
    sensor: Arc<dyn ThermalSensor>,
    reference: Arc<dyn ReferenceSource>,
    profile: SharedProfile,
    settings: CalibrationSettings,
    capture_timeout: Duration,
    interlock: SafetyInterlock,
}

impl Calibrator {
    /// Calibrator writing into `profile`.
    pub fn new(
        sensor: Arc<dyn ThermalSensor>,
        reference: Arc<dyn ReferenceSource>,
        profile: SharedProfile,
        settings: CalibrationSettings,
        capture_timeout: Duration,
        interlock: SafetyInterlock,
    ) -> Self {
        Self {
            sensor,
            reference,
            profile,
            settings,
            capture_timeout,
            interlock,
        }
    }

    /// Snapshot of the current profile.
    pub fn profile(&self) -> CalibrationProfile {
        self.profile.read().clone()
    }

    /// Procedure settings.
    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// Single-point (offset) calibration at `reference_c`.
    ///
    /// # Errors
    ///
    /// `EquilibriumTimeout` if the source never settles (the current profile
    /// is marked stale), `EmergencyStop` if the interlock trips, or a sensor
    /// error from the measurement.
    #[instrument(skip(self))]
    pub async fn calibrate(&self, reference_c: f64) -> AppResult<CalibrationProfile> {
        let point = self.measure_with_release(reference_c).await?;
        self.publish(CalibrationProfile::single_point(point))
    }

    /// Least-squares calibration over several setpoints.
    ///
    /// # Errors
    ///
    /// As [`Calibrator::calibrate`], plus `Configuration` when fewer than two
    /// distinct setpoints are given.
    #[instrument(skip(self))]
    pub async fn calibrate_multi_point(&self, references: &[f64]) -> AppResult<CalibrationProfile> {
        let mut distinct: Vec<f64> = references.to_vec();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup();
        if distinct.len() < 2 {
            return Err(InspectError::Configuration(format!(
                "Multi-point calibration needs at least two distinct setpoints, got {references:?}"
            )));
        }

        let mut points = Vec::with_capacity(distinct.len());
        for &target in &distinct {
            points.push(self.measure_with_release(target).await?);
        }
        let profile = CalibrationProfile::fit(points)?;
        self.publish(profile)
    }

    fn publish(&self, profile: CalibrationProfile) -> AppResult<CalibrationProfile> {
        self.interlock.check()?;
        info!(
            gain = profile.gain,
            offset = profile.offset,
            points = profile.reference_points.len(),
            "Calibration profile updated"
        );
        *self.profile.write() = profile.clone();
        Ok(profile)
    }

    async fn measure_with_release(&self, target: f64) -> AppResult<ReferencePoint> {
        let result = self.measure(target).await;
        if let Err(err) = self.reference.release().await {
            warn!(%err, "Failed to release reference source");
        }
        if let Err(InspectError::EquilibriumTimeout { .. }) = &result {
            self.profile.write().mark_stale();
        }
        result
    }

    async fn measure(&self, target: f64) -> AppResult<ReferencePoint> {
        self.reference.set_temperature(target).await?;
        let reference = self.wait_for_equilibrium(target).await?;

        // Offset is taken against the source reading at equilibrium, not the setpoint.
        let mut total = 0.0;
        for _ in 0..self.settings.samples {
            self.interlock.check()?;
            total += self.sample_center().await?;
        }
        let measured = total / self.settings.samples as f64;
        debug!(target, reference, measured, "Reference point measured");
        Ok(ReferencePoint {
            reference,
            measured,
        })
    }

    async fn wait_for_equilibrium(&self, target: f64) -> AppResult<f64> {
        let contract = self.settings.wait_contract();
        let tolerance = self.settings.tolerance_c;
        let dwell = self.settings.dwell();
        let mut in_band_since = None;

        let outcome = contract
            .poll_until(
                &self.interlock,
                || self.reference.read_reference(),
                |reading: &f64, now| {
                    if (reading - target).abs() <= tolerance {
                        let since = *in_band_since.get_or_insert(now);
                        now - since >= dwell
                    } else {
                        in_band_since = None;
                        false
                    }
                },
            )
            .await?;

        match outcome {
            PollOutcome::Satisfied(reading) => Ok(reading),
            PollOutcome::TimedOut(last) => {
                warn!(target, last_reading = ?last, "Reference source did not settle");
                Err(InspectError::EquilibriumTimeout {
                    target,
                    last_reading: last.unwrap_or(f64::NAN),
                    waited_ms: contract.max_duration.as_millis() as u64,
                })
            }
        }
    }

    async fn sample_center(&self) -> AppResult<f64> {
        let (w, h) = self.sensor.dimensions();
        let raw = timeout(self.capture_timeout, self.sensor.read_raw_grid())
            .await
            .map_err(|_| InspectError::SensorTimeout {
                timeout_ms: self.capture_timeout.as_millis() as u64,
            })??;
        if raw.len() != w * h {
            return Err(InspectError::SensorComm(format!(
                "expected {} samples, got {}",
                w * h,
                raw.len()
            )));
        }

        let size = self.settings.center_region;
        let (rw, rh) = (size.min(w), size.min(h));
        let (x0, y0) = ((w - rw) / 2, (h - rh) / 2);
        let sum: f64 = (y0..y0 + rh)
            .flat_map(|y| raw[y * w + x0..y * w + x0 + rw].iter())
            .sum();
        Ok(sum / (rw * rh) as f64)
    }
}
