//! Mock Hardware Implementations
//!
//! Provides simulated hardware devices for testing without physical hardware.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockThermalSensor` - Simulated 2-D thermal array with a configurable scene
//! - `MockStage` - Simulated X/Y stage with hard limits and a move log
//! - `MockBlackBody` - Simulated reference source that approaches its setpoint
//! - `MemoryFrameSink` - Frame persistence collaborator that keeps frames in memory
//!
//! # Wiring
//!
//! The sensor can be attached to a stage (anomalies are only visible when the
//! stage is near their location) and to a black body (while the black body is
//! in view, it fills the whole frame).
//!
//! ```rust,ignore
//! let stage = MockStage::new();
//! let black_body = MockBlackBody::new(22.0);
//! let sensor = MockThermalSensor::new(32, 24, 22.0)
//!     .attached_to_stage(&stage)
//!     .viewing_reference(&black_body);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock as SyncRwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::data::{FrameStats, ThermalFrame};
use crate::error::{AppResult, InspectError};
use crate::hardware::capabilities::{MotionStage, ReferenceSource, ThermalSensor};
use crate::scan::ScanPoint;
use crate::telemetry::FrameSink;

// =============================================================================
// MockThermalSensor - Simulated thermal array
// =============================================================================

/// Rectangular temperature anomaly painted into the simulated scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneAnomaly {
    /// Stage position (mm) at which the anomaly is in view; `None` = always
    pub at: Option<ScanPoint>,
    /// Distance (mm) from `at` within which the anomaly is visible
    pub tolerance_mm: f64,
    /// Top-left pixel column
    pub x: usize,
    /// Top-left pixel row
    pub y: usize,
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
    /// Temperature offset from ambient (°C), negative for cold anomalies
    pub delta: f64,
}

impl SceneAnomaly {
    /// A `width` x `height` block offset by `delta`, always in view.
    pub fn block(x: usize, y: usize, width: usize, height: usize, delta: f64) -> Self {
        Self {
            at: None,
            tolerance_mm: 0.5,
            x,
            y,
            width,
            height,
            delta,
        }
    }

    /// Restrict visibility to a stage position.
    pub fn seen_at(mut self, point: ScanPoint) -> Self {
        self.at = Some(point);
        self
    }

    fn visible_from(&self, stage: Option<(f64, f64)>) -> bool {
        match (self.at, stage) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(at), Some((sx, sy))) => {
                let dx = at.x - sx;
                let dy = at.y - sy;
                (dx * dx + dy * dy).sqrt() <= self.tolerance_mm
            }
        }
    }

    fn contains(&self, px: usize, py: usize) -> bool {
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }
}

/// Injected sensor failure, consumed one per read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    /// The read never completes (the caller's timeout must fire)
    Hang,
    /// The read fails with a communication error
    CommError,
}

/// Mock thermal array.
///
/// The simulated detector sees `true_temperature` and reports
/// `(true_temperature - raw_offset) / raw_gain`, so a correct calibration
/// profile is `gain = raw_gain`, `offset = raw_offset`.
pub struct MockThermalSensor {
    width: usize,
    height: usize,
    ambient: Arc<RwLock<f64>>,
    anomalies: SyncRwLock<Vec<SceneAnomaly>>,
    raw_gain: f64,
    raw_offset: f64,
    noise_amplitude: f64,
    read_delay: Duration,
    rng: Mutex<ChaCha8Rng>,
    faults: Arc<RwLock<VecDeque<SensorFault>>>,
    read_count: Arc<RwLock<u32>>,
    stage: Option<Arc<RwLock<(f64, f64)>>>,
    reference: Option<Arc<RwLock<BlackBodyState>>>,
}

impl MockThermalSensor {
    /// Create a noiseless, undistorted sensor looking at a uniform scene.
    pub fn new(width: usize, height: usize, ambient: f64) -> Self {
        Self {
            width,
            height,
            ambient: Arc::new(RwLock::new(ambient)),
            anomalies: SyncRwLock::new(Vec::new()),
            raw_gain: 1.0,
            raw_offset: 0.0,
            noise_amplitude: 0.0,
            read_delay: Duration::from_millis(0),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(0)),
            faults: Arc::new(RwLock::new(VecDeque::new())),
            read_count: Arc::new(RwLock::new(0)),
            stage: None,
            reference: None,
        }
    }

    /// Apply a raw-domain distortion the calibration has to undo.
    pub fn with_distortion(mut self, raw_gain: f64, raw_offset: f64) -> Self {
        self.raw_gain = raw_gain;
        self.raw_offset = raw_offset;
        self
    }

    /// Add uniform noise in `[-amplitude, amplitude]` from a seeded generator.
    pub fn with_noise(mut self, amplitude: f64, seed: u64) -> Self {
        self.noise_amplitude = amplitude;
        self.rng = Mutex::new(ChaCha8Rng::seed_from_u64(seed));
        self
    }

    /// Simulate a readout time per frame.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Paint an anomaly into the scene.
    pub fn with_anomaly(mut self, anomaly: SceneAnomaly) -> Self {
        self.anomalies.get_mut().push(anomaly);
        self
    }

    /// Paint an anomaly into the scene of a sensor that is already shared.
    pub fn add_anomaly(&self, anomaly: SceneAnomaly) {
        self.anomalies.write().push(anomaly);
    }

    /// Make anomaly visibility follow `stage`'s position.
    pub fn attached_to_stage(mut self, stage: &MockStage) -> Self {
        self.stage = Some(stage.position.clone());
        self
    }

    /// Let `black_body` fill the view while it is active.
    pub fn viewing_reference(mut self, black_body: &MockBlackBody) -> Self {
        self.reference = Some(black_body.state.clone());
        self
    }

    /// Queue faults for the next reads.
    pub async fn inject_faults(&self, faults: impl IntoIterator<Item = SensorFault>) {
        self.faults.write().await.extend(faults);
    }

    /// Change the ambient temperature.
    pub async fn set_ambient(&self, celsius: f64) {
        *self.ambient.write().await = celsius;
    }

    /// Total number of read attempts, including failed ones.
    pub async fn read_count(&self) -> u32 {
        *self.read_count.read().await
    }

    async fn true_temperatures(&self) -> Vec<f64> {
        if let Some(reference) = &self.reference {
            let state = reference.read().await;
            if state.in_view {
                return vec![state.current; self.width * self.height];
            }
        }

        let ambient = *self.ambient.read().await;
        let stage = match &self.stage {
            Some(position) => Some(*position.read().await),
            None => None,
        };
        let anomalies = self.anomalies.read();
        let visible: Vec<&SceneAnomaly> =
            anomalies.iter().filter(|a| a.visible_from(stage)).collect();

        let mut pixels = Vec::with_capacity(self.width * self.height);
        for py in 0..self.height {
            for px in 0..self.width {
                let delta: f64 = visible
                    .iter()
                    .filter(|a| a.contains(px, py))
                    .map(|a| a.delta)
                    .sum();
                pixels.push(ambient + delta);
            }
        }
        pixels
    }
}

#[async_trait]
impl ThermalSensor for MockThermalSensor {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    async fn read_raw_grid(&self) -> AppResult<Vec<f64>> {
        *self.read_count.write().await += 1;

        let fault = self.faults.write().await.pop_front();
        match fault {
            Some(SensorFault::Hang) => {
                debug!("MockThermalSensor: simulating hung read");
                sleep(Duration::from_secs(3600)).await;
                return Err(InspectError::SensorComm("read hung".to_string()));
            }
            Some(SensorFault::CommError) => {
                debug!("MockThermalSensor: simulating bus error");
                return Err(InspectError::SensorComm("I2C NACK".to_string()));
            }
            None => {}
        }

        if !self.read_delay.is_zero() {
            sleep(self.read_delay).await;
        }

        let truth = self.true_temperatures().await;
        let mut rng = self.rng.lock();
        let raw = truth
            .into_iter()
            .map(|t| {
                let noise = if self.noise_amplitude > 0.0 {
                    rng.gen_range(-self.noise_amplitude..=self.noise_amplitude)
                } else {
                    0.0
                };
                (t + noise - self.raw_offset) / self.raw_gain
            })
            .collect();
        Ok(raw)
    }
}

// =============================================================================
// MockStage - Simulated X/Y stage
// =============================================================================

/// Mock two-axis stage with realistic timing
///
/// Simulates:
/// - Configurable travel speed (default 50 mm/s)
/// - Hard limits that reject targets with `OutOfRange`
/// - A log of every commanded target
pub struct MockStage {
    position: Arc<RwLock<(f64, f64)>>,
    limits: (f64, f64, f64, f64),
    speed_mm_per_sec: f64,
    moves: Arc<RwLock<Vec<(f64, f64)>>>,
    fail_next: Arc<RwLock<bool>>,
}

impl MockStage {
    /// Create a stage at the origin with ±150 mm travel.
    pub fn new() -> Self {
        Self::with_limits(-150.0, 150.0, -150.0, 150.0)
    }

    /// Create a stage with custom hard limits.
    pub fn with_limits(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self {
            position: Arc::new(RwLock::new((0.0, 0.0))),
            limits: (x_min, x_max, y_min, y_max),
            speed_mm_per_sec: 50.0,
            moves: Arc::new(RwLock::new(Vec::new())),
            fail_next: Arc::new(RwLock::new(false)),
        }
    }

    /// Change travel speed.
    pub fn with_speed(mut self, speed_mm_per_sec: f64) -> Self {
        self.speed_mm_per_sec = speed_mm_per_sec;
        self
    }

    /// Every target commanded so far.
    pub async fn moves(&self) -> Vec<(f64, f64)> {
        self.moves.read().await.clone()
    }

    /// Number of moves commanded so far.
    pub async fn move_count(&self) -> usize {
        self.moves.read().await.len()
    }

    /// Make the next move fail with a driver fault.
    pub async fn fail_next_move(&self) {
        *self.fail_next.write().await = true;
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotionStage for MockStage {
    async fn set_position(&self, x: f64, y: f64) -> AppResult<()> {
        if std::mem::take(&mut *self.fail_next.write().await) {
            return Err(InspectError::Motion("MockStage: amplifier fault".to_string()));
        }

        let (x_min, x_max, y_min, y_max) = self.limits;
        if !(x_min..=x_max).contains(&x) || !(y_min..=y_max).contains(&y) {
            return Err(InspectError::OutOfRange { x, y });
        }

        let current = *self.position.read().await;
        let distance = ((x - current.0).powi(2) + (y - current.1).powi(2)).sqrt();
        let delay_ms = (distance / self.speed_mm_per_sec * 1000.0) as u64;
        debug!(
            "MockStage: Moving from ({:.2}, {:.2}) to ({:.2}, {:.2}) ({}ms)",
            current.0, current.1, x, y, delay_ms
        );

        self.moves.write().await.push((x, y));
        sleep(Duration::from_millis(delay_ms)).await;
        *self.position.write().await = (x, y);
        Ok(())
    }

    async fn current_position(&self) -> AppResult<(f64, f64)> {
        Ok(*self.position.read().await)
    }
}

// =============================================================================
// MockBlackBody - Simulated reference source
// =============================================================================

#[derive(Debug, Clone)]
struct BlackBodyState {
    current: f64,
    setpoint: Option<f64>,
    in_view: bool,
}

/// Mock black-body reference.
///
/// Each `read_reference` moves the emitter a fixed fraction of the way toward
/// its setpoint, so equilibrium depends on the number of polls rather than
/// wall time. With an oscillation amplitude the reading alternates around the
/// setpoint and never settles.
pub struct MockBlackBody {
    state: Arc<RwLock<BlackBodyState>>,
    approach_rate: f64,
    oscillation: SyncRwLock<f64>,
    reads: Arc<RwLock<u32>>,
}

impl MockBlackBody {
    /// Create an idle black body at `initial` °C.
    pub fn new(initial: f64) -> Self {
        Self {
            state: Arc::new(RwLock::new(BlackBodyState {
                current: initial,
                setpoint: None,
                in_view: false,
            })),
            approach_rate: 0.5,
            oscillation: SyncRwLock::new(0.0),
            reads: Arc::new(RwLock::new(0)),
        }
    }

    /// Fraction of the remaining error closed per read (0, 1].
    pub fn with_approach_rate(mut self, rate: f64) -> Self {
        self.approach_rate = rate.clamp(f64::EPSILON, 1.0);
        self
    }

    /// Never settle: readings alternate `±amplitude` around the setpoint.
    pub fn with_oscillation(mut self, amplitude: f64) -> Self {
        *self.oscillation.get_mut() = amplitude;
        self
    }

    /// Change the oscillation amplitude; 0 restores normal settling.
    pub fn set_oscillation(&self, amplitude: f64) {
        *self.oscillation.write() = amplitude;
    }

    /// Whether the emitter currently fills the sensor's view.
    pub async fn in_view(&self) -> bool {
        self.state.read().await.in_view
    }

    /// Number of reference readings taken.
    pub async fn read_count(&self) -> u32 {
        *self.reads.read().await
    }
}

#[async_trait]
impl ReferenceSource for MockBlackBody {
    async fn set_temperature(&self, celsius: f64) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.setpoint = Some(celsius);
        state.in_view = true;
        debug!("MockBlackBody: setpoint {:.2} °C", celsius);
        Ok(())
    }

    async fn read_reference(&self) -> AppResult<f64> {
        let mut reads = self.reads.write().await;
        *reads += 1;

        let mut state = self.state.write().await;
        if let Some(setpoint) = state.setpoint {
            let oscillation = *self.oscillation.read();
            if oscillation > 0.0 {
                let sign = if *reads % 2 == 0 { 1.0 } else { -1.0 };
                state.current = setpoint + sign * oscillation;
            } else {
                state.current += (setpoint - state.current) * self.approach_rate;
            }
        }
        Ok(state.current)
    }

    async fn release(&self) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.setpoint = None;
        state.in_view = false;
        Ok(())
    }
}

// =============================================================================
// MemoryFrameSink - In-memory persistence collaborator
// =============================================================================

/// Frame sink that records what it was asked to save.
#[derive(Default)]
pub struct MemoryFrameSink {
    saved: Arc<RwLock<Vec<(ScanPoint, FrameStats)>>>,
    fail: Arc<RwLock<bool>>,
}

impl MemoryFrameSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail.
    pub async fn set_failing(&self, failing: bool) {
        *self.fail.write().await = failing;
    }

    /// Saved positions and frame statistics, in save order.
    pub async fn saved(&self) -> Vec<(ScanPoint, FrameStats)> {
        self.saved.read().await.clone()
    }
}

#[async_trait]
impl FrameSink for MemoryFrameSink {
    async fn save(&self, frame: &ThermalFrame, position: ScanPoint) -> AppResult<()> {
        if *self.fail.read().await {
            return Err(InspectError::Io(std::io::Error::other("disk full")));
        }
        self.saved.write().await.push((position, frame.stats()));
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sensor_uniform_scene() {
        let sensor = MockThermalSensor::new(8, 6, 21.5);
        let raw = sensor.read_raw_grid().await.unwrap();
        assert_eq!(raw.len(), 48);
        assert!(raw.iter().all(|&v| v == 21.5));
        assert_eq!(sensor.read_count().await, 1);
    }

    #[tokio::test]
    async fn test_sensor_distortion_is_invertible() {
        let sensor = MockThermalSensor::new(4, 4, 30.0).with_distortion(2.0, 4.0);
        let raw = sensor.read_raw_grid().await.unwrap();
        // corrected = raw * gain + offset recovers the scene
        assert!((raw[0] * 2.0 + 4.0 - 30.0).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_anomaly_follows_stage() {
        let stage = MockStage::new();
        let sensor = MockThermalSensor::new(8, 8, 20.0)
            .with_anomaly(SceneAnomaly::block(3, 3, 2, 2, 10.0).seen_at(ScanPoint::new(5.0, 5.0)))
            .attached_to_stage(&stage);

        let away = sensor.read_raw_grid().await.unwrap();
        assert!(away.iter().all(|&v| v == 20.0));

        stage.set_position(5.0, 5.0).await.unwrap();
        let over = sensor.read_raw_grid().await.unwrap();
        assert_eq!(over[3 * 8 + 3], 30.0);
        assert_eq!(over[0], 20.0);
    }

    #[tokio::test]
    async fn test_sensor_fault_injection() {
        let sensor = MockThermalSensor::new(4, 4, 20.0);
        sensor.inject_faults([SensorFault::CommError]).await;
        assert!(matches!(
            sensor.read_raw_grid().await,
            Err(InspectError::SensorComm(_))
        ));
        assert!(sensor.read_raw_grid().await.is_ok());
        assert_eq!(sensor.read_count().await, 2);
    }

    #[tokio::test]
    async fn test_noise_is_deterministic_per_seed() {
        let a = MockThermalSensor::new(4, 4, 20.0).with_noise(0.5, 7);
        let b = MockThermalSensor::new(4, 4, 20.0).with_noise(0.5, 7);
        let ra = a.read_raw_grid().await.unwrap();
        let rb = b.read_raw_grid().await.unwrap();
        assert_eq!(ra, rb);
        assert!(ra.iter().all(|v| (v - 20.0).abs() <= 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_limits_and_log() {
        let stage = MockStage::with_limits(-10.0, 10.0, -10.0, 10.0);
        stage.set_position(5.0, -5.0).await.unwrap();
        assert_eq!(stage.current_position().await.unwrap(), (5.0, -5.0));

        let err = stage.set_position(11.0, 0.0).await.unwrap_err();
        assert!(matches!(err, InspectError::OutOfRange { .. }));
        assert_eq!(stage.moves().await, vec![(5.0, -5.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_injected_fault() {
        let stage = MockStage::new();
        stage.fail_next_move().await;
        assert!(matches!(
            stage.set_position(1.0, 1.0).await,
            Err(InspectError::Motion(_))
        ));
        stage.set_position(1.0, 1.0).await.unwrap();
    }

    #[tokio::test]
    async fn test_black_body_approaches_setpoint() {
        let bb = MockBlackBody::new(20.0).with_approach_rate(0.5);
        bb.set_temperature(40.0).await.unwrap();
        assert!(bb.in_view().await);
        assert_eq!(bb.read_reference().await.unwrap(), 30.0);
        assert_eq!(bb.read_reference().await.unwrap(), 35.0);

        bb.release().await.unwrap();
        assert!(!bb.in_view().await);
    }

    #[tokio::test]
    async fn test_sensor_sees_black_body_in_view() {
        let bb = MockBlackBody::new(20.0).with_approach_rate(1.0);
        let sensor = MockThermalSensor::new(4, 4, 25.0).viewing_reference(&bb);
        bb.set_temperature(50.0).await.unwrap();
        bb.read_reference().await.unwrap();
        let raw = sensor.read_raw_grid().await.unwrap();
        assert!(raw.iter().all(|&v| v == 50.0));
    }

    #[tokio::test]
    async fn test_memory_sink_failure() {
        let sink = MemoryFrameSink::new();
        let frame = ThermalFrame::uniform(5, 5, 20.0).unwrap();
        sink.save(&frame, ScanPoint::new(0.0, 0.0)).await.unwrap();
        sink.set_failing(true).await;
        assert!(sink.save(&frame, ScanPoint::new(1.0, 0.0)).await.is_err());
        assert_eq!(sink.saved().await.len(), 1);
    }
}
