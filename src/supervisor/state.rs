//! Controller state machine.
//!
//! The table in [`SystemState::on`] is the single source of truth for which
//! transitions exist. Guards that depend on the outside world (calibration
//! validity, the interlock) are checked by the supervisor before it fires an
//! event; the table itself is pure.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InspectError;

/// Top-level controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemState {
    /// Ready for requests
    Idle,
    /// Calibration procedure running
    Calibrating,
    /// Scan loop running
    Scanning,
    /// Classifying the finished scan
    Analyzing,
    /// Publishing results
    Reporting,
    /// A fault needs acknowledgement
    Error,
    /// Emergency latch set; needs an explicit reset
    EmergencyStopped,
}

impl SystemState {
    /// Stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Idle => "Idle",
            SystemState::Calibrating => "Calibrating",
            SystemState::Scanning => "Scanning",
            SystemState::Analyzing => "Analyzing",
            SystemState::Reporting => "Reporting",
            SystemState::Error => "Error",
            SystemState::EmergencyStopped => "EmergencyStopped",
        }
    }

    /// Whether a job or calibration is in progress.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SystemState::Calibrating
                | SystemState::Scanning
                | SystemState::Analyzing
                | SystemState::Reporting
        )
    }

    /// Next state for `event`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when the table has no entry for the pair.
    pub fn on(self, event: SupervisorEvent) -> Result<SystemState, InspectError> {
        use SupervisorEvent as E;
        use SystemState as S;

        let next = match (self, event) {
            (_, E::Emergency) => S::EmergencyStopped,
            (S::EmergencyStopped, E::InterlockCleared) => S::Idle,
            (S::EmergencyStopped, _) => return Err(self.reject(event)),

            (_, E::Fault) => S::Error,
            (S::Error, E::AcknowledgeReset) => S::Idle,

            (S::Idle, E::StartScan) => S::Scanning,
            (S::Idle, E::StartCalibration) => S::Calibrating,

            (S::Calibrating, E::CalibrationSucceeded | E::CalibrationTimedOut) => S::Idle,

            (S::Scanning, E::JobComplete) => S::Analyzing,
            (S::Scanning, E::Abort) => S::Idle,
            (S::Analyzing, E::AnalysisDone) => S::Reporting,
            (S::Reporting, E::ReportDone) => S::Idle,

            _ => return Err(self.reject(event)),
        };
        Ok(next)
    }

    fn reject(self, event: SupervisorEvent) -> InspectError {
        InspectError::InvalidTransition {
            from: self,
            event: event.name(),
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorEvent {
    /// Scan request accepted
    StartScan,
    /// Calibration request accepted
    StartCalibration,
    /// Calibration finished with a valid profile
    CalibrationSucceeded,
    /// Reference never reached equilibrium
    CalibrationTimedOut,
    /// Every scan point visited
    JobComplete,
    /// Scan aborted on request
    Abort,
    /// Classification finished
    AnalysisDone,
    /// Results published
    ReportDone,
    /// Unrecoverable failure
    Fault,
    /// Operator acknowledged a fault
    AcknowledgeReset,
    /// Emergency stop asserted
    Emergency,
    /// Emergency latch released
    InterlockCleared,
}

impl SupervisorEvent {
    /// Stable name.
    pub fn name(&self) -> &'static str {
        match self {
            SupervisorEvent::StartScan => "start_scan",
            SupervisorEvent::StartCalibration => "start_calibration",
            SupervisorEvent::CalibrationSucceeded => "calibration_succeeded",
            SupervisorEvent::CalibrationTimedOut => "calibration_timed_out",
            SupervisorEvent::JobComplete => "job_complete",
            SupervisorEvent::Abort => "abort",
            SupervisorEvent::AnalysisDone => "analysis_done",
            SupervisorEvent::ReportDone => "report_done",
            SupervisorEvent::Fault => "fault",
            SupervisorEvent::AcknowledgeReset => "acknowledge_reset",
            SupervisorEvent::Emergency => "emergency",
            SupervisorEvent::InterlockCleared => "interlock_cleared",
        }
    }
}
