//! Common test utilities for thermal_inspect integration tests
//!
//! This module provides reusable test helpers for:
//! - Wiring a supervisor to mock hardware
//! - Recording telemetry and injecting actions at chosen events
//! - Timing assertions with appropriate tolerances

#![allow(dead_code)] // Utilities may not all be used by every test binary

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thermal_inspect::config::InspectConfig;
use thermal_inspect::hardware::mock::{MemoryFrameSink, MockBlackBody, MockStage, MockThermalSensor};
use thermal_inspect::safety::SafetyInterlock;
use thermal_inspect::scan::{ScanBounds, ScanJob};
use thermal_inspect::supervisor::{Collaborators, Supervisor, SystemState};
use thermal_inspect::telemetry::{TelemetryEvent, TelemetrySink};

/// Sensor geometry used throughout the integration tests.
pub const WIDTH: usize = 32;
/// Sensor geometry used throughout the integration tests.
pub const HEIGHT: usize = 24;
/// Scene ambient temperature.
pub const AMBIENT: f64 = 22.0;

/// Tolerance levels for timing assertions.
#[derive(Debug, Clone, Copy)]
pub enum TimingTolerance {
    /// Exact match - only for simulated time with `start_paused = true`
    Exact,
    /// 5% tolerance
    Tight,
}

impl TimingTolerance {
    /// Get the tolerance factor as a fraction
    pub fn factor(&self) -> f64 {
        match self {
            TimingTolerance::Exact => 0.0,
            TimingTolerance::Tight => 0.05,
        }
    }
}

/// Assert that a duration is within tolerance of an expected value.
pub fn assert_duration_near(
    actual: Duration,
    expected: Duration,
    tolerance: TimingTolerance,
    context: &str,
) {
    let factor = tolerance.factor();
    let min = expected.mul_f64(1.0 - factor);
    let max = expected.mul_f64(1.0 + factor);
    assert!(
        actual >= min && actual <= max,
        "{}: expected {:?} ±{:.0}%, got {:?}",
        context,
        expected,
        factor * 100.0,
        actual
    );
}

/// What a [`RecordingTelemetry`] does when its trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Latch the emergency stop
    Emergency,
    /// Request a scan abort
    Abort,
}

type Trigger = Box<dyn Fn(&TelemetryEvent) -> bool + Send + Sync>;

/// Telemetry sink that keeps every event and can act on the interlock when a
/// chosen event arrives.
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
    interlock: SafetyInterlock,
    trigger: Option<(Trigger, Action)>,
}

impl RecordingTelemetry {
    /// Record only.
    pub fn new(interlock: SafetyInterlock) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            interlock,
            trigger: None,
        }
    }

    /// Perform `action` whenever `when` matches an event.
    pub fn acting_on(
        mut self,
        when: impl Fn(&TelemetryEvent) -> bool + Send + Sync + 'static,
        action: Action,
    ) -> Self {
        self.trigger = Some((Box::new(when), action));
        self
    }

    /// Snapshot of everything published so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `completed` values of every progress event, in order.
    pub fn progress_counts(&self) -> Vec<usize> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                TelemetryEvent::Progress { completed, .. } => Some(*completed),
                _ => None,
            })
            .collect()
    }

    /// States entered, in order.
    pub fn states_entered(&self) -> Vec<SystemState> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                TelemetryEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn publish(&self, event: TelemetryEvent) {
        if let Some((when, action)) = &self.trigger {
            if when(&event) {
                match action {
                    Action::Emergency => self.interlock.trip_emergency(),
                    Action::Abort => self.interlock.request_abort(),
                }
            }
        }
        self.events.lock().unwrap().push(event);
    }
}

/// Trigger matching the progress event for the `n`th finished point.
pub fn after_point(n: usize) -> impl Fn(&TelemetryEvent) -> bool + Send + Sync + 'static {
    move |event| matches!(event, TelemetryEvent::Progress { completed, .. } if *completed == n)
}

/// Supervisor wired to mock hardware, with handles on every mock.
pub struct Rig {
    pub supervisor: Supervisor,
    pub sensor: Arc<MockThermalSensor>,
    pub stage: Arc<MockStage>,
    pub black_body: Arc<MockBlackBody>,
    pub sink: Arc<MemoryFrameSink>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub interlock: SafetyInterlock,
}

/// Fast timings so paused-clock tests stay short.
pub fn test_config() -> InspectConfig {
    let mut config = InspectConfig::default();
    config.sensor.width = WIDTH;
    config.sensor.height = HEIGHT;
    config.motion.settle_ms = 20;
    config.calibration.dwell_ms = 200;
    config.calibration.poll_interval_ms = 20;
    config.calibration.timeout_ms = 3_000;
    config
}

/// Builder for [`Rig`].
pub struct RigBuilder {
    config: InspectConfig,
    sensor: Box<dyn FnOnce(MockThermalSensor) -> MockThermalSensor>,
    black_body: MockBlackBody,
    trigger: Option<(Trigger, Action)>,
}

impl RigBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            sensor: Box::new(|s| s),
            black_body: MockBlackBody::new(AMBIENT),
            trigger: None,
        }
    }

    pub fn config(mut self, edit: impl FnOnce(&mut InspectConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn sensor(mut self, customize: impl FnOnce(MockThermalSensor) -> MockThermalSensor + 'static) -> Self {
        self.sensor = Box::new(customize);
        self
    }

    pub fn black_body(mut self, black_body: MockBlackBody) -> Self {
        self.black_body = black_body;
        self
    }

    pub fn on_event(
        mut self,
        when: impl Fn(&TelemetryEvent) -> bool + Send + Sync + 'static,
        action: Action,
    ) -> Self {
        self.trigger = Some((Box::new(when), action));
        self
    }

    pub fn build(self) -> Rig {
        let interlock = SafetyInterlock::new();
        let stage = Arc::new(MockStage::new().with_speed(f64::INFINITY));
        let black_body = Arc::new(self.black_body);
        let sensor = (self.sensor)(MockThermalSensor::new(
            self.config.sensor.width,
            self.config.sensor.height,
            AMBIENT,
        ))
        .attached_to_stage(&stage)
        .viewing_reference(&black_body);
        let sensor = Arc::new(sensor);
        let sink = Arc::new(MemoryFrameSink::new());

        let mut telemetry = RecordingTelemetry::new(interlock.clone());
        telemetry.trigger = self.trigger;
        let telemetry = Arc::new(telemetry);

        let supervisor = Supervisor::new(
            &self.config,
            Collaborators {
                sensor: sensor.clone(),
                stage: stage.clone(),
                reference: black_body.clone(),
                frame_sink: Some(sink.clone()),
                telemetry: telemetry.clone(),
                interlock: interlock.clone(),
            },
        )
        .expect("valid rig configuration");

        Rig {
            supervisor,
            sensor,
            stage,
            black_body,
            sink,
            telemetry,
            interlock,
        }
    }
}

/// Default rig with a valid calibration at 35 °C.
pub async fn calibrated_rig(builder: RigBuilder) -> Rig {
    let mut rig = builder.build();
    rig.supervisor
        .request_calibration(35.0)
        .await
        .expect("calibration succeeds");
    rig
}

/// The 11x11 grid over ±25 mm at 5 mm spacing.
pub fn grid_121() -> ScanJob {
    ScanJob::grid(ScanBounds::centered(25.0), 5.0)
}
