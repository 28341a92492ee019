//! Defect records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scan::ScanPoint;

/// Defect category. The first four are produced by detectors; the refined
/// kinds are only ever assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    /// Pixel hotter than background
    HotSpot,
    /// Pixel colder than background
    ColdSpot,
    /// Steep spatial gradient
    GradientAnomaly,
    /// Local texture inconsistent with its surroundings
    PatternAnomaly,
    /// Hot spot severe enough to need immediate attention
    CriticalHotSpot,
    /// Gradient line suggestive of a crack
    CrackSuspect,
    /// Large cold region suggestive of a void or delamination
    VoidSuspect,
}

impl DefectKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectKind::HotSpot => "hot_spot",
            DefectKind::ColdSpot => "cold_spot",
            DefectKind::GradientAnomaly => "gradient_anomaly",
            DefectKind::PatternAnomaly => "pattern_anomaly",
            DefectKind::CriticalHotSpot => "critical_hot_spot",
            DefectKind::CrackSuspect => "crack_suspect",
            DefectKind::VoidSuspect => "void_suspect",
        }
    }

    /// Whether this kind is a classifier refinement.
    pub fn is_refined(&self) -> bool {
        matches!(
            self,
            DefectKind::CriticalHotSpot | DefectKind::CrackSuspect | DefectKind::VoidSuspect
        )
    }
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    /// Pixel column
    pub x: usize,
    /// Pixel row
    pub y: usize,
    /// Measured value at the defect. °C for spots and patterns, gradient
    /// magnitude (°C/pixel) for gradient anomalies
    pub temperature: f64,
    /// Magnitude relative to the detector threshold, ≥ 0
    pub severity: f64,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Category
    pub kind: DefectKind,
    /// Affected pixel count
    pub area: usize,
    /// Human-readable summary
    pub description: String,
    /// Stage position of the frame the defect was found in
    pub position: Option<ScanPoint>,
}

impl Defect {
    /// Construct a defect, clamping confidence into [0, 1] and severity to
    /// be non-negative.
    pub fn new(
        x: usize,
        y: usize,
        kind: DefectKind,
        temperature: f64,
        severity: f64,
        confidence: f64,
    ) -> Self {
        Self {
            x,
            y,
            temperature,
            severity: severity.max(0.0),
            confidence: confidence.clamp(0.0, 1.0),
            kind,
            area: 1,
            description: String::new(),
            position: None,
        }
    }

    /// Set the affected area.
    pub fn with_area(mut self, area: usize) -> Self {
        self.area = area.max(1);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Tag with the stage position.
    pub fn at_position(mut self, position: ScanPoint) -> Self {
        self.position = Some(position);
        self
    }
}
