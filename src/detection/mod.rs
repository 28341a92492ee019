//! Anomaly detection over thermal frames.
//!
//! Three independent detectors run over each frame in a fixed order (spots,
//! gradient, pattern) and append into one bounded [`DefectList`]. The list is
//! rebuilt per analysis; nothing accumulates across frames.
//!
//! The spot detector measures deviation from the frame's outer ring. That is
//! only a good background estimate when the inspected feature does not touch
//! the frame edge.

pub mod classifier;
pub mod defect;
pub mod gradient;
pub mod list;
pub mod pattern;
pub mod spots;

pub use classifier::{reclassify, reclassify_all, DefectClassifier, DefectSummary};
pub use defect::{Defect, DefectKind};
pub use gradient::GradientDetector;
pub use list::{DefectList, PushOutcome};
pub use pattern::PatternDetector;
pub use spots::SpotDetector;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::ThermalFrame;

/// Detection thresholds and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Spot threshold: |pixel − background| in °C
    pub delta_threshold: f64,
    /// Sobel magnitude threshold
    pub gradient_threshold: f64,
    /// |3×3 mean − ring mean| threshold in °C
    pub pattern_threshold: f64,
    /// Confidence reported for gradient defects
    pub gradient_confidence: f64,
    /// Confidence reported for pattern defects
    pub pattern_confidence: f64,
    /// Maximum defects kept per frame
    pub capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            delta_threshold: 2.0,
            gradient_threshold: 8.0,
            pattern_threshold: 3.0,
            gradient_confidence: 0.7,
            pattern_confidence: 0.6,
            capacity: 100,
        }
    }
}

impl DetectionConfig {
    /// Thresholds positive and finite, confidences in [0, 1], capacity > 0.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("delta_threshold", self.delta_threshold),
            ("gradient_threshold", self.gradient_threshold),
            ("pattern_threshold", self.pattern_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("detection.{name} must be positive, got {value}"));
            }
        }
        for (name, value) in [
            ("gradient_confidence", self.gradient_confidence),
            ("pattern_confidence", self.pattern_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("detection.{name} must be within [0, 1], got {value}"));
            }
        }
        if self.capacity == 0 {
            return Err("detection.capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// One detection pass over a frame.
pub trait AnomalyDetector: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Append findings for `frame` to `out`. Must stop early once `out`
    /// reports saturation.
    fn detect(&self, frame: &ThermalFrame, background: f64, out: &mut DefectList);
}

/// The detector pipeline run on every analysed frame.
pub struct DetectorSet {
    detectors: Vec<Box<dyn AnomalyDetector>>,
    capacity: usize,
}

impl DetectorSet {
    /// Spots, gradient and pattern detectors configured from `config`.
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            detectors: vec![
                Box::new(SpotDetector::new(config.delta_threshold)),
                Box::new(GradientDetector::new(
                    config.gradient_threshold,
                    config.gradient_confidence,
                )),
                Box::new(PatternDetector::new(
                    config.pattern_threshold,
                    config.pattern_confidence,
                )),
            ],
            capacity: config.capacity,
        }
    }

    /// Per-frame capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run every detector over `frame` into a fresh list.
    ///
    /// Every detector scans the whole frame even after the list fills, so
    /// `dropped()` counts every finding that did not fit. Saturation is
    /// logged as a warning.
    pub fn analyze(&self, frame: &ThermalFrame) -> DefectList {
        let background = frame.background_temperature();
        let mut out = DefectList::with_capacity(self.capacity);

        for detector in &self.detectors {
            let before = out.len();
            detector.detect(frame, background, &mut out);
            debug!(
                detector = detector.name(),
                stored = out.len() - before,
                background,
                "Detector pass complete"
            );
        }

        if let Some(overflow) = out.overflow() {
            warn!(%overflow, "Defect list saturated; remaining findings discarded");
        }
        out
    }
}

impl Default for DetectorSet {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default())
    }
}
