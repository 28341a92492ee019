//! Thermal frames and the single-slot frame store.
//!
//! A [`ThermalFrame`] is a row-major grid of corrected temperatures in °C.
//! Statistics are computed once when the frame is built and never change; the
//! only mutable bit is the validity flag, which the store clears when a newer
//! capture fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, InspectError};

/// Summary statistics of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    /// Coldest sample (°C)
    pub min: f64,
    /// Hottest sample (°C)
    pub max: f64,
    /// Arithmetic mean (°C)
    pub mean: f64,
    /// Population standard deviation (°C)
    pub stddev: f64,
}

impl FrameStats {
    /// Single-pass min/max/mean/stddev (Welford).
    fn compute(pixels: &[f64]) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        for (i, &value) in pixels.iter().enumerate() {
            min = min.min(value);
            max = max.max(value);
            let delta = value - mean;
            mean += delta / (i + 1) as f64;
            m2 += delta * (value - mean);
        }
        let n = pixels.len().max(1) as f64;
        Self {
            min,
            max,
            mean,
            stddev: (m2 / n).sqrt(),
        }
    }
}

/// One complete thermal capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalFrame {
    width: usize,
    height: usize,
    pixels: Vec<f64>,
    stats: FrameStats,
    captured_at: DateTime<Utc>,
    valid: bool,
}

impl ThermalFrame {
    /// Build a frame from row-major corrected samples, stamped now.
    ///
    /// # Errors
    ///
    /// `SensorComm` if the sample count does not match `width * height` or
    /// the grid is empty.
    pub fn from_samples(width: usize, height: usize, pixels: Vec<f64>) -> AppResult<Self> {
        if width == 0 || height == 0 {
            return Err(InspectError::SensorComm(format!(
                "empty frame geometry {width}x{height}"
            )));
        }
        let expected = width * height;
        if pixels.len() != expected {
            return Err(InspectError::SensorComm(format!(
                "expected {expected} samples for {width}x{height}, got {}",
                pixels.len()
            )));
        }
        let stats = FrameStats::compute(&pixels);
        Ok(Self {
            width,
            height,
            pixels,
            stats,
            captured_at: Utc::now(),
            valid: true,
        })
    }

    /// A frame where every pixel reads `value`.
    pub fn uniform(width: usize, height: usize, value: f64) -> AppResult<Self> {
        Self::from_samples(width, height, vec![value; width * height])
    }

    /// Frame width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major samples.
    pub fn pixels(&self) -> &[f64] {
        &self.pixels
    }

    /// Precomputed statistics.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Capture timestamp.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// False once a later capture has failed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn mark_stale(&mut self) {
        self.valid = false;
    }

    /// Sample at `(x, y)`. Caller guarantees bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.pixels[y * self.width + x]
    }

    /// Sample at `(x, y)`, or `None` outside the grid.
    pub fn at(&self, x: usize, y: usize) -> Option<f64> {
        (x < self.width && y < self.height).then(|| self.get(x, y))
    }

    /// Mean of the outermost ring of pixels.
    ///
    /// The border is assumed to show background material. This only holds
    /// when the inspected feature sits away from the frame edge; a defect
    /// touching the border biases the estimate toward itself.
    pub fn background_temperature(&self) -> f64 {
        let (w, h) = (self.width, self.height);
        if w <= 2 || h <= 2 {
            return self.stats.mean;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for x in 0..w {
            sum += self.get(x, 0) + self.get(x, h - 1);
            count += 2;
        }
        for y in 1..h - 1 {
            sum += self.get(0, y) + self.get(w - 1, y);
            count += 2;
        }
        sum / count as f64
    }

    /// Mean and population variance of the square window of `radius` around
    /// `(x, y)`, clipped to the frame.
    pub fn window_stats(&self, x: usize, y: usize, radius: usize) -> (f64, f64) {
        let x0 = x.saturating_sub(radius);
        let y0 = y.saturating_sub(radius);
        let x1 = (x + radius).min(self.width - 1);
        let y1 = (y + radius).min(self.height - 1);

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut n = 0usize;
        for yy in y0..=y1 {
            for xx in x0..=x1 {
                let v = self.get(xx, yy);
                sum += v;
                sum_sq += v * v;
                n += 1;
            }
        }
        let n = n as f64;
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        (mean, variance)
    }

    /// Mean of the pixels at exactly Chebyshev distance `distance` from
    /// `(x, y)`. The whole ring must lie inside the frame.
    pub fn ring_mean(&self, x: usize, y: usize, distance: usize) -> f64 {
        debug_assert!(x >= distance && y >= distance);
        debug_assert!(x + distance < self.width && y + distance < self.height);
        if distance == 0 {
            return self.get(x, y);
        }
        let (x0, y0) = (x - distance, y - distance);
        let (x1, y1) = (x + distance, y + distance);
        let mut sum = 0.0;
        let mut n = 0usize;
        for xx in x0..=x1 {
            sum += self.get(xx, y0) + self.get(xx, y1);
            n += 2;
        }
        for yy in y0 + 1..y1 {
            sum += self.get(x0, yy) + self.get(x1, yy);
            n += 2;
        }
        sum / n as f64
    }
}

/// Holds the most recent capture. Exactly one current frame at a time; a new
/// capture supersedes it, a failed capture marks it stale.
#[derive(Debug, Default, Clone)]
pub struct FrameStore {
    current: Option<ThermalFrame>,
}

impl FrameStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame, returning a reference to it.
    pub fn replace(&mut self, frame: ThermalFrame) -> &ThermalFrame {
        self.current.insert(frame)
    }

    /// Flag the current frame as no longer trustworthy.
    pub fn mark_stale(&mut self) {
        if let Some(frame) = self.current.as_mut() {
            frame.mark_stale();
        }
    }

    /// The current frame, valid or not.
    pub fn current(&self) -> Option<&ThermalFrame> {
        self.current.as_ref()
    }

    /// The current frame only if it is still valid.
    pub fn current_valid(&self) -> Option<&ThermalFrame> {
        self.current.as_ref().filter(|f| f.is_valid())
    }

    /// Drop the current frame.
    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> ThermalFrame {
        let pixels = (0..width * height).map(|i| i as f64).collect();
        ThermalFrame::from_samples(width, height, pixels).unwrap()
    }

    #[test]
    fn test_stats_single_pass() {
        let frame = ThermalFrame::from_samples(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let stats = frame.stats();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert!((stats.mean - 2.5).abs() < 1e-12);
        assert!((stats.stddev - 1.25_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_sample_count_mismatch() {
        let err = ThermalFrame::from_samples(4, 4, vec![0.0; 15]).unwrap_err();
        assert!(matches!(err, InspectError::SensorComm(_)));
    }

    #[test]
    fn test_background_is_border_mean() {
        let mut pixels = vec![20.0; 5 * 5];
        // interior values must not affect the estimate
        pixels[2 * 5 + 2] = 90.0;
        pixels[5 + 1] = 50.0;
        let frame = ThermalFrame::from_samples(5, 5, pixels).unwrap();
        assert!((frame.background_temperature() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_window_stats_clipped_at_corner() {
        let frame = ramp(4, 4);
        // window around (0,0) radius 1 covers 0,1,4,5
        let (mean, variance) = frame.window_stats(0, 0, 1);
        assert!((mean - 2.5).abs() < 1e-12);
        assert!((variance - 4.25).abs() < 1e-9);
    }

    #[test]
    fn test_ring_mean_distance_two() {
        let mut pixels = vec![0.0; 5 * 5];
        for y in 0..5 {
            for x in 0..5 {
                if x == 0 || y == 0 || x == 4 || y == 4 {
                    pixels[y * 5 + x] = 8.0;
                }
            }
        }
        let frame = ThermalFrame::from_samples(5, 5, pixels).unwrap();
        assert!((frame.ring_mean(2, 2, 2) - 8.0).abs() < 1e-12);
        assert_eq!(frame.ring_mean(2, 2, 1), 0.0);
    }

    #[test]
    fn test_store_marks_previous_stale() {
        let mut store = FrameStore::new();
        assert!(store.current().is_none());
        store.replace(ThermalFrame::uniform(5, 5, 21.0).unwrap());
        assert!(store.current_valid().is_some());

        store.mark_stale();
        assert!(store.current().is_some());
        assert!(store.current_valid().is_none());

        store.replace(ThermalFrame::uniform(5, 5, 22.0).unwrap());
        assert_eq!(store.current_valid().unwrap().get(0, 0), 22.0);
    }
}
