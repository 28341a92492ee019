//! Scan-and-detect engine for an infrared inspection controller.
//!
//! The crate moves a thermal sensor over a part on a two-axis stage, captures
//! calibrated frames at each point, runs hot/cold spot, gradient and pattern
//! detectors, and classifies what it finds. A [`supervisor::Supervisor`]
//! gates every job on calibration and the emergency interlock.
//!
//! Hardware is reached only through the traits in [`hardware`]; simulated
//! devices live in [`hardware::mock`].

pub mod acquisition;
pub mod calibration;
pub mod config;
pub mod data;
pub mod detection;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod logging;
pub mod safety;
pub mod scan;
pub mod supervisor;
pub mod telemetry;

pub use error::{AppResult, InspectError, RejectReason};
