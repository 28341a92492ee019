//! Top-level controller.
//!
//! The [`Supervisor`] owns the scan orchestrator and the calibrator, admits or
//! rejects requests according to the current [`SystemState`], and drives the
//! state machine through each job. Everything runs on the caller's task; the
//! only concurrent entry points are the emergency and abort controls exposed
//! through a cloneable [`SupervisorHandle`].

pub mod state;

pub use state::{SupervisorEvent, SystemState};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::acquisition::FrameAcquisition;
use crate::calibration::{CalibrationProfile, CalibrationStatus, Calibrator, SharedProfile};
use crate::config::InspectConfig;
use crate::detection::{reclassify_all, Defect, DefectClassifier, DetectorSet};
use crate::error::{AppResult, InspectError, RejectReason};
use crate::hardware::{MotionStage, ReferenceSource, ThermalSensor};
use crate::safety::SafetyInterlock;
use crate::scan::{MotionExecutor, ScanJob, ScanOrchestrator, ScanOutcome, ScanReport};
use crate::telemetry::{FrameSink, TelemetryEvent, TelemetrySink};

/// External collaborators the supervisor is wired to.
pub struct Collaborators {
    /// Thermal array
    pub sensor: Arc<dyn ThermalSensor>,
    /// Positioning mechanism
    pub stage: Arc<dyn MotionStage>,
    /// Calibration reference
    pub reference: Arc<dyn ReferenceSource>,
    /// Frame persistence, if any
    pub frame_sink: Option<Arc<dyn FrameSink>>,
    /// Progress and result telemetry
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Emergency latch shared with the physical input
    pub interlock: SafetyInterlock,
}

/// Observable state with validated transitions.
#[derive(Clone)]
struct StateCell {
    tx: Arc<watch::Sender<SystemState>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl StateCell {
    fn new(initial: SystemState, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            telemetry,
        }
    }

    fn current(&self) -> SystemState {
        *self.tx.borrow()
    }

    /// Apply `event` atomically with respect to other handles.
    fn fire(&self, event: SupervisorEvent) -> AppResult<SystemState> {
        let mut from = SystemState::Idle;
        let mut next = Ok(SystemState::Idle);
        self.tx.send_if_modified(|state| {
            from = *state;
            next = state.on(event);
            match &next {
                Ok(to) if *to != *state => {
                    *state = *to;
                    true
                }
                _ => false,
            }
        });

        let to = next?;
        if to != from {
            info!(%from, %to, event = event.name(), "State transition");
            self.telemetry.publish(TelemetryEvent::StateChanged { from, to });
        }
        Ok(to)
    }
}

/// Cloneable control surface usable from other tasks while a job runs.
#[derive(Clone)]
pub struct SupervisorHandle {
    state: StateCell,
    interlock: SafetyInterlock,
    progress: watch::Receiver<f64>,
}

impl SupervisorHandle {
    /// Latch the emergency stop. Takes effect before the next scan point.
    pub fn emergency_stop(&self) {
        self.interlock.trip_emergency();
        // Emergency is accepted from every state.
        let _ = self.state.fire(SupervisorEvent::Emergency);
    }

    /// Feed the physical interlock input. Asserting it latches the emergency
    /// stop.
    pub fn set_interlock_input(&self, asserted: bool) {
        self.interlock.set_physical_input(asserted);
        if asserted {
            let _ = self.state.fire(SupervisorEvent::Emergency);
        }
    }

    /// Ask the running scan to stop before its next point.
    pub fn abort_scan(&self) {
        self.interlock.request_abort();
    }

    /// Current state.
    pub fn current_state(&self) -> SystemState {
        self.state.current()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SystemState> {
        self.state.tx.subscribe()
    }

    /// Fraction of the current scan completed.
    pub fn progress(&self) -> f64 {
        *self.progress.borrow()
    }
}

/// The inspection controller.
pub struct Supervisor {
    state: StateCell,
    interlock: SafetyInterlock,
    orchestrator: ScanOrchestrator,
    calibrator: Calibrator,
    profile: SharedProfile,
    classifier: DefectClassifier,
    telemetry: Arc<dyn TelemetrySink>,
    max_calibration_age: Duration,
    plausible: (f64, f64),
    last_report: Option<ScanReport>,
    last_fault: Option<String>,
}

impl Supervisor {
    /// Wire a supervisor from configuration and collaborators.
    ///
    /// Starts in `Idle`, or `EmergencyStopped` if the interlock is already
    /// latched.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration fails validation, `Configuration` if
    /// the sensor geometry disagrees with it.
    pub fn new(config: &InspectConfig, parts: Collaborators) -> AppResult<Self> {
        config.validate()?;

        let (width, height) = parts.sensor.dimensions();
        if (width, height) != (config.sensor.width, config.sensor.height) {
            return Err(InspectError::Configuration(format!(
                "Sensor reports {width}x{height} but configuration expects {}x{}",
                config.sensor.width, config.sensor.height
            )));
        }

        let profile = SharedProfile::default();
        let acquisition = FrameAcquisition::new(parts.sensor.clone(), profile.clone(), &config.sensor);
        let motion = MotionExecutor::new(
            parts.stage,
            config.motion.envelope,
            config.motion.settle_time(),
        );
        let orchestrator = ScanOrchestrator::new(
            acquisition,
            motion,
            DetectorSet::from_config(&config.detection),
            config.sensor.retry_policy(),
            parts.frame_sink,
            parts.telemetry.clone(),
            parts.interlock.clone(),
        );
        let calibrator = Calibrator::new(
            parts.sensor,
            parts.reference,
            profile.clone(),
            config.calibration.clone(),
            config.sensor.capture_timeout(),
            parts.interlock.clone(),
        );

        let initial = if parts.interlock.is_emergency() {
            SystemState::EmergencyStopped
        } else {
            SystemState::Idle
        };
        info!(state = %initial, width, height, "Supervisor ready");

        Ok(Self {
            state: StateCell::new(initial, parts.telemetry.clone()),
            interlock: parts.interlock,
            orchestrator,
            calibrator,
            profile,
            classifier: DefectClassifier::new(),
            telemetry: parts.telemetry,
            max_calibration_age: config.calibration.max_age(),
            plausible: (config.sensor.min_plausible_c, config.sensor.max_plausible_c),
            last_report: None,
            last_fault: None,
        })
    }

    /// Control handle for other tasks.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            state: self.state.clone(),
            interlock: self.interlock.clone(),
            progress: self.orchestrator.subscribe_progress(),
        }
    }

    /// Current state.
    pub fn current_state(&self) -> SystemState {
        self.state.current()
    }

    /// Fraction of the current (or last) scan completed.
    pub fn progress(&self) -> f64 {
        self.orchestrator.progress()
    }

    /// Classified defects of the last scan, in scan order.
    pub fn last_defects(&self) -> &[Defect] {
        self.classifier.last_defects()
    }

    /// Report of the last scan, whatever its outcome.
    pub fn last_report(&self) -> Option<&ScanReport> {
        self.last_report.as_ref()
    }

    /// Reason recorded with the last fault.
    pub fn last_fault(&self) -> Option<&str> {
        self.last_fault.as_deref()
    }

    /// Snapshot of the calibration profile.
    pub fn calibration_profile(&self) -> CalibrationProfile {
        self.profile.read().clone()
    }

    /// Run a scan job.
    ///
    /// Requires `Idle`, no emergency latch, and a fresh valid calibration.
    /// On completion the state passes through `Analyzing` and `Reporting`
    /// back to `Idle`. An aborted scan returns straight to `Idle`; an
    /// emergency stop leaves the controller in `EmergencyStopped`. In both
    /// cases the partial report is returned.
    ///
    /// # Errors
    ///
    /// `Rejected` if the request is not admissible. Motion failures are
    /// returned after the controller enters `Error`.
    #[instrument(skip(self, job), fields(pattern = %job.pattern))]
    pub async fn request_scan(&mut self, job: ScanJob) -> AppResult<ScanReport> {
        self.admit()?;
        self.check_calibration()?;
        if let Err(err) = job.path() {
            return Err(InspectError::Rejected(RejectReason::InvalidRequest(
                err.to_string(),
            )));
        }

        // A stale abort from an earlier job must not stop this one.
        self.interlock.take_abort();
        self.state.fire(SupervisorEvent::StartScan)?;

        let mut report = match self.orchestrator.run(&job).await {
            Ok(report) => report,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };
        if self.interlock.is_emergency() {
            report.outcome = ScanOutcome::EmergencyStopped;
        }

        match report.outcome {
            ScanOutcome::EmergencyStopped => {
                self.state.fire(SupervisorEvent::Emergency)?;
                self.finalize_defects(&mut report);
                warn!(
                    visited = report.completed_points(),
                    total = report.total_points,
                    "Scan halted by emergency stop"
                );
            }
            ScanOutcome::Aborted => {
                self.state.fire(SupervisorEvent::Abort)?;
                self.finalize_defects(&mut report);
            }
            ScanOutcome::Completed => {
                self.state.fire(SupervisorEvent::JobComplete)?;
                self.finalize_defects(&mut report);
                self.state.fire(SupervisorEvent::AnalysisDone)?;

                let summary = self.classifier.summary();
                info!(
                    run_uid = %report.run_uid,
                    defects = summary.total,
                    dropped = report.dropped_defects(),
                    "Scan report ready"
                );
                self.telemetry.publish(TelemetryEvent::DefectSummary {
                    run_uid: report.run_uid.clone(),
                    summary,
                });
                self.state.fire(SupervisorEvent::ReportDone)?;
            }
        }

        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Single-point calibration at `reference_c`.
    ///
    /// # Errors
    ///
    /// `Rejected` if not admissible, `EquilibriumTimeout` if the reference
    /// never settles (state returns to `Idle`, profile marked stale), or the
    /// sensor error that moved the controller to `Error`.
    pub async fn request_calibration(&mut self, reference_c: f64) -> AppResult<CalibrationProfile> {
        self.run_calibration(&[reference_c]).await
    }

    /// Least-squares calibration over several setpoints.
    ///
    /// # Errors
    ///
    /// As [`Supervisor::request_calibration`]; fewer than two distinct
    /// setpoints is rejected up front.
    pub async fn request_calibration_points(
        &mut self,
        references: &[f64],
    ) -> AppResult<CalibrationProfile> {
        let mut distinct = references.to_vec();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup();
        if distinct.len() < 2 {
            return Err(InspectError::Rejected(RejectReason::InvalidRequest(
                "multi-point calibration needs at least two distinct setpoints".to_string(),
            )));
        }
        self.run_calibration(references).await
    }

    #[instrument(skip(self))]
    async fn run_calibration(&mut self, references: &[f64]) -> AppResult<CalibrationProfile> {
        self.admit()?;
        let (low, high) = self.plausible;
        if let Some(bad) = references
            .iter()
            .find(|r| !r.is_finite() || **r < low || **r > high)
        {
            return Err(InspectError::Rejected(RejectReason::InvalidRequest(format!(
                "reference temperature {bad} outside {low}..{high} °C"
            ))));
        }

        self.state.fire(SupervisorEvent::StartCalibration)?;
        let result = match references {
            [single] => self.calibrator.calibrate(*single).await,
            many => self.calibrator.calibrate_multi_point(many).await,
        };
        let result = match result {
            Ok(_) if self.interlock.is_emergency() => Err(InspectError::EmergencyStop),
            other => other,
        };

        match result {
            Ok(profile) => {
                self.state.fire(SupervisorEvent::CalibrationSucceeded)?;
                Ok(profile)
            }
            Err(err @ InspectError::EquilibriumTimeout { .. }) => {
                warn!(error = %err, "Calibration timed out, profile marked stale");
                self.state.fire(SupervisorEvent::CalibrationTimedOut)?;
                Err(err)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Latch the emergency stop and enter `EmergencyStopped`.
    pub fn emergency_stop(&self) {
        self.handle().emergency_stop();
    }

    /// Enter `Error` with `reason`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` while emergency-stopped.
    pub fn report_fault(&mut self, reason: impl Into<String>) -> AppResult<()> {
        let reason = reason.into();
        self.state.fire(SupervisorEvent::Fault)?;
        error!(%reason, "Fault reported");
        self.last_fault = Some(reason);
        Ok(())
    }

    /// Leave `Error` for `Idle`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the controller is in `Error`.
    pub fn acknowledge_fault(&mut self) -> AppResult<()> {
        self.state.fire(SupervisorEvent::AcknowledgeReset)?;
        self.last_fault = None;
        Ok(())
    }

    /// Release the emergency latch and return to `Idle`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless emergency-stopped; `InterlockAsserted` while
    /// the physical input is still asserted.
    pub fn reset_emergency(&mut self) -> AppResult<()> {
        self.state.current().on(SupervisorEvent::InterlockCleared)?;
        self.interlock.clear_emergency()?;
        self.state.fire(SupervisorEvent::InterlockCleared)?;
        info!("Emergency latch released");
        Ok(())
    }

    fn admit(&mut self) -> AppResult<()> {
        let state = self.state.current();
        if self.interlock.is_emergency() || state == SystemState::EmergencyStopped {
            if state != SystemState::EmergencyStopped {
                self.state.fire(SupervisorEvent::Emergency)?;
            }
            return Err(InspectError::Rejected(RejectReason::EmergencyLatched));
        }
        if state != SystemState::Idle {
            return Err(InspectError::Rejected(RejectReason::Busy(state)));
        }
        Ok(())
    }

    fn check_calibration(&self) -> AppResult<()> {
        let (status, fresh) = {
            let profile = self.profile.read();
            (
                profile.status,
                profile.is_fresh(self.max_calibration_age, Utc::now()),
            )
        };
        match status {
            CalibrationStatus::Uncalibrated => {
                Err(InspectError::Rejected(RejectReason::CalibrationInvalid))
            }
            CalibrationStatus::Stale => Err(InspectError::Rejected(RejectReason::CalibrationStale)),
            CalibrationStatus::Valid if !fresh => {
                warn!(
                    max_age_secs = self.max_calibration_age.as_secs(),
                    "Calibration expired"
                );
                self.profile.write().mark_stale();
                Err(InspectError::Rejected(RejectReason::CalibrationStale))
            }
            CalibrationStatus::Valid => Ok(()),
        }
    }

    /// Run deferred detection, relabel, and retain the result.
    fn finalize_defects(&mut self, report: &mut ScanReport) {
        let detectors = self.orchestrator.detectors();
        for point in &mut report.points {
            if let Some(frame) = point.frame.take() {
                point.record_analysis(detectors.analyze(&frame));
            }
            reclassify_all(&mut point.defects);
        }
        let defects = report.defects().cloned().collect();
        self.classifier.classify(defects);
    }

    fn fail(&mut self, err: &InspectError) {
        let event = if matches!(err, InspectError::EmergencyStop) || self.interlock.is_emergency() {
            SupervisorEvent::Emergency
        } else {
            error!(error = %err, "Job failed");
            self.last_fault = Some(err.to_string());
            SupervisorEvent::Fault
        };
        if let Err(transition) = self.state.fire(event) {
            warn!(error = %transition, "Could not record failure state");
        }
    }
}
