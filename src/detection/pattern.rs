//! Local pattern inconsistency detection.

use crate::data::ThermalFrame;
use crate::detection::{AnomalyDetector, Defect, DefectKind, DefectList};

/// Pixels covered by the inner 3×3 window.
const WINDOW_AREA: usize = 9;

/// Compares the mean of each 3×3 window with the mean of the ring of pixels
/// at Chebyshev distance 2. Only pixels at least two away from every edge
/// are evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternDetector {
    /// Minimum |inner − ring| (°C) to flag
    pub threshold: f64,
    /// Fixed confidence assigned to every pattern defect
    pub confidence: f64,
}

impl PatternDetector {
    /// Detector with the given threshold and confidence.
    pub fn new(threshold: f64, confidence: f64) -> Self {
        Self {
            threshold,
            confidence,
        }
    }
}

impl AnomalyDetector for PatternDetector {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn detect(&self, frame: &ThermalFrame, _background: f64, out: &mut DefectList) {
        let (w, h) = (frame.width(), frame.height());
        if w < 5 || h < 5 {
            return;
        }

        for y in 2..h - 2 {
            for x in 2..w - 2 {
                let (inner, _) = frame.window_stats(x, y, 1);
                let ring = frame.ring_mean(x, y, 2);
                let difference = (inner - ring).abs();
                if difference <= self.threshold {
                    continue;
                }

                let defect = Defect::new(
                    x,
                    y,
                    DefectKind::PatternAnomaly,
                    inner,
                    difference / self.threshold,
                    self.confidence,
                )
                .with_area(WINDOW_AREA)
                .with_description(format!(
                    "local mean {inner:.2} °C vs surrounding {ring:.2} °C"
                ));

                out.push(defect);
            }
        }
    }
}
