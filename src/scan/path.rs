//! Scan path generation.
//!
//! Paths are plain `Vec<ScanPoint>` built eagerly from `(pattern, bounds,
//! step)`. Generation is a pure function of its arguments, so a job can be
//! re-run or previewed and will visit exactly the same points.

use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, InspectError};

/// Upper bound on generated points to prevent unbounded allocations.
pub const MAX_SCAN_POINTS: usize = 1_000_000;

/// Target position in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// X coordinate (mm)
    pub x: f64,
    /// Y coordinate (mm)
    pub y: f64,
}

impl ScanPoint {
    /// Construct a point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: ScanPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Both coordinates are finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl fmt::Display for ScanPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// Rectangular scan area given by two opposite corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanBounds {
    /// First corner
    pub start: ScanPoint,
    /// Opposite corner
    pub end: ScanPoint,
}

impl ScanBounds {
    /// Bounds from two corners, in any order.
    pub const fn new(start: ScanPoint, end: ScanPoint) -> Self {
        Self { start, end }
    }

    /// Square bounds centered on the origin with half-width `half`.
    pub fn centered(half: f64) -> Self {
        Self::new(ScanPoint::new(-half, -half), ScanPoint::new(half, half))
    }

    /// Lower-left corner.
    pub fn min(&self) -> ScanPoint {
        ScanPoint::new(self.start.x.min(self.end.x), self.start.y.min(self.end.y))
    }

    /// Upper-right corner.
    pub fn max(&self) -> ScanPoint {
        ScanPoint::new(self.start.x.max(self.end.x), self.start.y.max(self.end.y))
    }

    /// Midpoint of the rectangle.
    pub fn center(&self) -> ScanPoint {
        ScanPoint::new(
            (self.start.x + self.end.x) / 2.0,
            (self.start.y + self.end.y) / 2.0,
        )
    }

    /// Radius of the largest circle centered on the midpoint that fits inside.
    pub fn inscribed_radius(&self) -> f64 {
        let (min, max) = (self.min(), self.max());
        ((max.x - min.x) / 2.0).min((max.y - min.y) / 2.0)
    }

    /// Whether `point` lies inside (edges included).
    pub fn contains(&self, point: ScanPoint) -> bool {
        let (min, max) = (self.min(), self.max());
        (min.x..=max.x).contains(&point.x) && (min.y..=max.y).contains(&point.y)
    }

    fn is_finite(&self) -> bool {
        self.start.is_finite() && self.end.is_finite()
    }
}

/// Scan pattern selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPattern {
    /// Row-major raster
    Grid,
    /// Archimedean spiral from the center outward
    Spiral,
    /// The centroid only
    SinglePoint,
}

impl ScanPattern {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPattern::Grid => "grid",
            ScanPattern::Spiral => "spiral",
            ScanPattern::SinglePoint => "single_point",
        }
    }
}

impl fmt::Display for ScanPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanPattern {
    type Err = InspectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grid" => Ok(ScanPattern::Grid),
            "spiral" => Ok(ScanPattern::Spiral),
            "single" | "single_point" | "single-point" | "point" => Ok(ScanPattern::SinglePoint),
            other => Err(InspectError::Configuration(format!(
                "Unknown scan pattern '{other}'. Must be one of: grid, spiral, single_point"
            ))),
        }
    }
}

/// Generate the ordered point sequence for `pattern` over `bounds`.
///
/// # Errors
///
/// `Configuration` if the step is not a positive finite number, the bounds
/// are not finite, or the path would exceed [`MAX_SCAN_POINTS`].
pub fn generate(pattern: ScanPattern, bounds: ScanBounds, step: f64) -> AppResult<Vec<ScanPoint>> {
    if !step.is_finite() || step <= 0.0 {
        return Err(InspectError::Configuration(format!(
            "Scan step must be a positive finite number, got {step}"
        )));
    }
    if !bounds.is_finite() {
        return Err(InspectError::Configuration(
            "Scan bounds must be finite".to_string(),
        ));
    }

    match pattern {
        ScanPattern::Grid => grid(bounds, step),
        ScanPattern::Spiral => spiral(bounds, step),
        ScanPattern::SinglePoint => Ok(vec![bounds.center()]),
    }
}

/// Number of lattice positions along a span, far edge included when it lands
/// on the lattice. The epsilon absorbs float error in `span / step`.
///
/// Counted in `f64` so a span that overflows, or a count past
/// [`MAX_SCAN_POINTS`], is reported as `None` instead of wrapping.
fn lattice_count(span: f64, step: f64) -> Option<usize> {
    let count = (span / step + 1e-9).floor() + 1.0;
    (count.is_finite() && count <= MAX_SCAN_POINTS as f64).then_some(count as usize)
}

// Every row runs in +x; there is no boustrophedon reversal between rows.
fn grid(bounds: ScanBounds, step: f64) -> AppResult<Vec<ScanPoint>> {
    let (min, max) = (bounds.min(), bounds.max());
    let too_large = || {
        InspectError::Configuration(format!(
            "Grid over {min} to {max} at step {step} exceeds the limit of {MAX_SCAN_POINTS} points"
        ))
    };
    let nx = lattice_count(max.x - min.x, step).ok_or_else(too_large)?;
    let ny = lattice_count(max.y - min.y, step).ok_or_else(too_large)?;
    let total = nx
        .checked_mul(ny)
        .filter(|&n| n <= MAX_SCAN_POINTS)
        .ok_or_else(too_large)?;

    let mut points = Vec::with_capacity(total);
    for j in 0..ny {
        let y = min.y + j as f64 * step;
        for i in 0..nx {
            points.push(ScanPoint::new(min.x + i as f64 * step, y));
        }
    }
    Ok(points)
}

// Radius grows linearly with the sample index, 0 at the first sample and the
// inscribed radius at the last. The winding count `max_radius / step` keeps
// consecutive arms one step apart.
fn spiral(bounds: ScanBounds, step: f64) -> AppResult<Vec<ScanPoint>> {
    let center = bounds.center();
    let max_radius = bounds.inscribed_radius();
    if max_radius <= 0.0 {
        return Ok(vec![center]);
    }

    let turns = max_radius / step;
    let count = (turns * TAU).ceil() as usize;
    if count > MAX_SCAN_POINTS {
        return Err(InspectError::Configuration(format!(
            "Spiral of {count} points exceeds the limit of {MAX_SCAN_POINTS}"
        )));
    }
    let count = count.max(2);

    let last = (count - 1) as f64;
    let points = (0..count)
        .map(|i| {
            let t = i as f64 / last;
            let radius = t * max_radius;
            let angle = t * turns * TAU;
            ScanPoint::new(
                center.x + radius * angle.cos(),
                center.y + radius * angle.sin(),
            )
        })
        .collect();
    Ok(points)
}
