//! Hot/cold spot detection against the border background.

use std::collections::VecDeque;

use crate::data::ThermalFrame;
use crate::detection::{AnomalyDetector, Defect, DefectKind, DefectList};

/// Deviation (°C) at which magnitude confidence saturates.
const FULL_CONFIDENCE_DELTA: f64 = 10.0;

/// Flags every pixel whose deviation from the background exceeds the
/// threshold.
///
/// `severity = |Δ| / threshold`. Confidence falls with the variance of the
/// 3×3 neighbourhood, so isolated noisy pixels score lower than a clean
/// plateau. `area` is the size of the 4-connected same-sign region the pixel
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotDetector {
    /// Minimum |Δ| (°C) to flag
    pub delta_threshold: f64,
}

impl SpotDetector {
    /// Detector with the given threshold.
    pub fn new(delta_threshold: f64) -> Self {
        Self { delta_threshold }
    }
}

impl AnomalyDetector for SpotDetector {
    fn name(&self) -> &'static str {
        "spots"
    }

    fn detect(&self, frame: &ThermalFrame, background: f64, out: &mut DefectList) {
        let regions = Regions::label(frame, background, self.delta_threshold);

        for y in 0..frame.height() {
            for x in 0..frame.width() {
                let Some(region) = regions.region_of(x, y, frame.width()) else {
                    continue;
                };
                let value = frame.get(x, y);
                let delta = value - background;
                let magnitude = delta.abs();
                let (kind, label) = if delta > 0.0 {
                    (DefectKind::HotSpot, "above")
                } else {
                    (DefectKind::ColdSpot, "below")
                };

                let (_, variance) = frame.window_stats(x, y, 1);
                let confidence =
                    (magnitude / FULL_CONFIDENCE_DELTA).min(1.0) / (1.0 + variance);

                let defect = Defect::new(
                    x,
                    y,
                    kind,
                    value,
                    magnitude / self.delta_threshold,
                    confidence,
                )
                .with_area(regions.sizes[region])
                .with_description(format!(
                    "{value:.2} °C, {magnitude:.2} °C {label} background {background:.2} °C"
                ));

                out.push(defect);
            }
        }
    }
}

/// 4-connected labelling of over-threshold pixels. Hot and cold pixels never
/// join the same region.
struct Regions {
    labels: Vec<Option<usize>>,
    sizes: Vec<usize>,
}

impl Regions {
    fn label(frame: &ThermalFrame, background: f64, threshold: f64) -> Self {
        let (w, h) = (frame.width(), frame.height());
        let sign = |x: usize, y: usize| -> i8 {
            let delta = frame.get(x, y) - background;
            if delta.abs() <= threshold {
                0
            } else if delta > 0.0 {
                1
            } else {
                -1
            }
        };

        let mut labels = vec![None; w * h];
        let mut sizes = Vec::new();
        let mut queue = VecDeque::new();

        for start in 0..w * h {
            let (sx, sy) = (start % w, start / w);
            let polarity = sign(sx, sy);
            if polarity == 0 || labels[start].is_some() {
                continue;
            }

            let id = sizes.len();
            let mut size = 0;
            labels[start] = Some(id);
            queue.push_back((sx, sy));
            while let Some((x, y)) = queue.pop_front() {
                size += 1;
                let neighbours = [
                    (x.wrapping_sub(1), y),
                    (x + 1, y),
                    (x, y.wrapping_sub(1)),
                    (x, y + 1),
                ];
                for (nx, ny) in neighbours {
                    if nx >= w || ny >= h {
                        continue;
                    }
                    let idx = ny * w + nx;
                    if labels[idx].is_none() && sign(nx, ny) == polarity {
                        labels[idx] = Some(id);
                        queue.push_back((nx, ny));
                    }
                }
            }
            sizes.push(size);
        }

        Self { labels, sizes }
    }

    fn region_of(&self, x: usize, y: usize, width: usize) -> Option<usize> {
        self.labels[y * width + x]
    }
}
