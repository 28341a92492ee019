//! Sobel gradient detection.

use crate::data::ThermalFrame;
use crate::detection::{AnomalyDetector, Defect, DefectKind, DefectList};

/// Flags interior pixels whose Sobel gradient magnitude exceeds the
/// threshold. The defect's `temperature` holds the magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientDetector {
    /// Minimum magnitude to flag
    pub threshold: f64,
    /// Fixed confidence assigned to every gradient defect
    pub confidence: f64,
}

impl GradientDetector {
    /// Detector with the given threshold and confidence.
    pub fn new(threshold: f64, confidence: f64) -> Self {
        Self {
            threshold,
            confidence,
        }
    }
}

/// Sobel `(gx, gy)` at an interior pixel.
fn sobel(frame: &ThermalFrame, x: usize, y: usize) -> (f64, f64) {
    let p = |dx: isize, dy: isize| {
        frame.get((x as isize + dx) as usize, (y as isize + dy) as usize)
    };
    let gx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
    let gy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
    (gx, gy)
}

impl AnomalyDetector for GradientDetector {
    fn name(&self) -> &'static str {
        "gradient"
    }

    fn detect(&self, frame: &ThermalFrame, _background: f64, out: &mut DefectList) {
        let (w, h) = (frame.width(), frame.height());
        if w < 3 || h < 3 {
            return;
        }

        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let (gx, gy) = sobel(frame, x, y);
                let magnitude = gx.hypot(gy);
                if magnitude <= self.threshold {
                    continue;
                }

                let direction = gy.atan2(gx).to_degrees();
                let defect = Defect::new(
                    x,
                    y,
                    DefectKind::GradientAnomaly,
                    magnitude,
                    magnitude / self.threshold,
                    self.confidence,
                )
                .with_description(format!(
                    "gradient {magnitude:.2} °C/px at {direction:.0}°"
                ));

                out.push(defect);
            }
        }
    }
}
