//! Motion execution: clamp, command, settle.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{AppResult, InspectError};
use crate::hardware::MotionStage;
use crate::scan::ScanPoint;

/// Physical limits of the positioning mechanism (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionEnvelope {
    /// Minimum X
    pub x_min: f64,
    /// Maximum X
    pub x_max: f64,
    /// Minimum Y
    pub y_min: f64,
    /// Maximum Y
    pub y_max: f64,
}

impl Default for MotionEnvelope {
    fn default() -> Self {
        Self {
            x_min: -100.0,
            x_max: 100.0,
            y_min: -100.0,
            y_max: 100.0,
        }
    }
}

impl MotionEnvelope {
    /// Finite and non-empty on both axes.
    pub fn is_valid(&self) -> bool {
        [self.x_min, self.x_max, self.y_min, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_min <= self.x_max
            && self.y_min <= self.y_max
    }

    /// Nearest point inside the envelope.
    pub fn clamp(&self, point: ScanPoint) -> ScanPoint {
        ScanPoint::new(
            point.x.clamp(self.x_min, self.x_max),
            point.y.clamp(self.y_min, self.y_max),
        )
    }

    /// Whether `point` is inside (edges included).
    pub fn contains(&self, point: ScanPoint) -> bool {
        self.clamp(point) == point
    }
}

/// Drives a [`MotionStage`] to scan points.
///
/// Targets outside the envelope are clamped, never rejected. Non-finite
/// targets cannot be clamped and fail with `OutOfRange`. After every move the
/// executor sleeps for the settle time; there is no position feedback loop.
pub struct MotionExecutor {
    stage: Arc<dyn MotionStage>,
    envelope: MotionEnvelope,
    settle: Duration,
    moves_issued: u64,
}

impl MotionExecutor {
    /// Executor over `stage`.
    pub fn new(stage: Arc<dyn MotionStage>, envelope: MotionEnvelope, settle: Duration) -> Self {
        Self {
            stage,
            envelope,
            settle,
            moves_issued: 0,
        }
    }

    /// The clamping envelope.
    pub fn envelope(&self) -> MotionEnvelope {
        self.envelope
    }

    /// Moves commanded so far.
    pub fn moves_issued(&self) -> u64 {
        self.moves_issued
    }

    /// Move to `target` (clamped) and wait for the settle time.
    ///
    /// Returns the position actually commanded.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for a non-finite target or a refusal from the stage,
    /// `Motion` for any other stage fault.
    pub async fn move_to(&mut self, target: ScanPoint) -> AppResult<ScanPoint> {
        if !target.is_finite() {
            return Err(InspectError::OutOfRange {
                x: target.x,
                y: target.y,
            });
        }

        let commanded = self.envelope.clamp(target);
        if commanded != target {
            warn!(%target, %commanded, "Scan target clamped to motion envelope");
        }

        self.stage.set_position(commanded.x, commanded.y).await?;
        self.moves_issued += 1;
        debug!(%commanded, settle_ms = self.settle.as_millis() as u64, "Move commanded");

        sleep(self.settle).await;
        Ok(commanded)
    }

    /// Position reported by the stage.
    pub async fn current_position(&self) -> AppResult<ScanPoint> {
        let (x, y) = self.stage.current_position().await?;
        Ok(ScanPoint::new(x, y))
    }
}
