//! Collaborator traits consumed by the inspection core.
//!
//! Each trait is the narrow surface of an external driver: the core never
//! sees registers, serial framing or SDK handles. Implementations must be
//! `Send + Sync` so they can live behind `Arc<dyn _>` and be shared with a
//! monitoring task.

use async_trait::async_trait;

use crate::error::AppResult;

/// Low-resolution thermal sensor array.
#[async_trait]
pub trait ThermalSensor: Send + Sync {
    /// `(width, height)` of the raw grid.
    fn dimensions(&self) -> (usize, usize);

    /// Read one raw, uncorrected grid in row-major order.
    ///
    /// # Errors
    ///
    /// `SensorComm` on bus/protocol failures. The caller bounds the call with
    /// its own timeout, so a hung read surfaces as `SensorTimeout` upstream.
    async fn read_raw_grid(&self) -> AppResult<Vec<f64>>;
}

/// Two-axis positioning mechanism.
///
/// ## Units
/// Millimetres in the mechanism's own frame.
///
/// ## Feedback
/// `set_position` returns once motion is commanded. There is no guarantee of
/// arrival; the executor waits a fixed settle time afterwards.
#[async_trait]
pub trait MotionStage: Send + Sync {
    /// Command an absolute move.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if the mechanism refuses the target, `Motion` for any
    /// other driver fault.
    async fn set_position(&self, x: f64, y: f64) -> AppResult<()>;

    /// Last known position.
    async fn current_position(&self) -> AppResult<(f64, f64)>;
}

/// Black-body / reference temperature source used during calibration.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Command the source to a setpoint (°C) and bring it into view.
    async fn set_temperature(&self, celsius: f64) -> AppResult<()>;

    /// Read the source's own reference thermometer (°C).
    async fn read_reference(&self) -> AppResult<f64>;

    /// Return the source to standby once calibration is done.
    async fn release(&self) -> AppResult<()> {
        Ok(())
    }
}
